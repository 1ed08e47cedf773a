//! Internal testing utilities for the tokenflow crates.
//!
//! This provides table-driven test helpers and access to the shared
//! tokenizer fixtures in the workspace's `test-data/` directory.

use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::path::PathBuf;

/// Utility for creating parametrized (aka. table-driven) tests.
///
/// Create a `Debug` struct, conventionally named `Case`, holding the data for
/// one case, collect the cases into an array or `Vec` and call `test_each`
/// with the test body:
///
/// ```
/// use tokenflow_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case<'a> {
///     text: &'a str,
///     words: usize,
/// }
///
/// let cases = [
///     Case { text: "brown fox", words: 2 },
///     Case { text: "", words: 0 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.text.split_whitespace().count(), case.words);
/// });
/// ```
///
/// All cases are run, even if earlier ones panic. Afterwards `test_each`
/// panics with the debug representation of each failing case, if any.
///
/// Cases and any values captured by the test closure must be unwind safe.
/// Values which are not (eg. a `Tokenizer` holding trait objects) should be
/// constructed inside the closure, or wrapped in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case, catching panics.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes cases by
    /// value. Each case is formatted before the test runs so that failures
    /// can still be reported.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<String> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .map(|case| format!("{:?}", case))
            .collect();
        report_failures(&failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let failures: Vec<String> = self
            .into_iter()
            .filter_map(|case| {
                let case_str = format!("{:?}", case);
                std::panic::catch_unwind(|| test(case))
                    .is_err()
                    .then_some(case_str)
            })
            .collect();
        report_failures(&failures);
    }
}

fn report_failures(failures: &[String]) {
    assert!(
        failures.is_empty(),
        "{} test cases failed: {:?}",
        failures.len(),
        failures
    );
}

/// Build a vocabulary which assigns each token the ID of its position in
/// `tokens`.
pub fn vocab_from_tokens(tokens: &[&str]) -> HashMap<String, u32> {
    tokens
        .iter()
        .enumerate()
        .map(|(i, token)| (token.to_string(), i as u32))
        .collect()
}

/// Return the absolute path of a file in the workspace's `test-data/`
/// directory.
pub fn test_data_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop();
    path.push("test-data");
    path.push(name);
    path
}

/// Read a UTF-8 file from the workspace's `test-data/` directory.
pub fn read_test_data(name: &str) -> Result<String, io::Error> {
    std::fs::read_to_string(test_data_path(name))
}

/// Compare two sequences of token IDs and describe the first mismatch.
///
/// Mismatched values are reported before length mismatches, so a truncated
/// output points at the first token that differs.
pub fn compare_token_ids(actual: &[u32], expected: &[u32]) -> Result<(), String> {
    if let Some((i, (a, e))) = actual
        .iter()
        .zip(expected)
        .enumerate()
        .find(|(_, (a, e))| a != e)
    {
        return Err(format!(
            "Tokens differ at index {i}. Actual {a} expected {e}"
        ));
    }
    if actual.len() != expected.len() {
        return Err(format!(
            "Lengths of token slices do not match. Actual {} expected {}",
            actual.len(),
            expected.len()
        ));
    }
    Ok(())
}
