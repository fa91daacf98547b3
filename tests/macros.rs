//! Common test macros.

/// Check that a floating-point value is within a tolerance of the expected
/// one.
///
/// # Usage
/// ```ignore
/// assert_approx_eq!(actual, expected);
/// assert_approx_eq!(actual, expected, epsilon);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($actual:expr, $expected:expr) => {
        assert_approx_eq!($actual, $expected, 1e-9)
    };
    ($actual:expr, $expected:expr, $epsilon:expr) => {
        let actual: f64 = $actual;
        let expected: f64 = $expected;
        let epsilon: f64 = $epsilon;
        let diff = (actual - expected).abs();
        assert!(
            diff <= epsilon,
            "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}`,\n   eps: `{:?}`",
            actual,
            expected,
            diff,
            epsilon
        );
    };
}

/// Read a float cell from an enriched record by column name.
///
/// # Usage
/// ```ignore
/// let delay = float_cell!(schema, record, "delay_minutes");
/// ```
#[macro_export]
macro_rules! float_cell {
    ($schema:expr, $record:expr, $column:expr) => {
        $record
            .get($schema.column($column).unwrap())
            .as_f64()
            .unwrap_or_else(|| panic!("column {} is not numeric", $column))
    };
}
