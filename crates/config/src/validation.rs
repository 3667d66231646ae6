//! Validation for configuration sections
//!
//! Each section checks its own ranges through [`ConfigSection::validate`];
//! constraints that span sections live in [`Config::validate`](crate::Config::validate).

pub use crate::error::ValidationError;

/// A named table of the config file
pub trait ConfigSection: Default {
    fn validate(&self) -> Result<(), Vec<ValidationError>>;

    /// Overwrites this section with `other`, which takes precedence
    fn merge(&mut self, other: Self);

    /// The table name in the config file
    fn section_name(&self) -> &'static str;
}

/// Range checks shared by the sections
pub struct Validator;

impl Validator {
    pub fn in_range<T>(value: T, min: T, max: T, field: &str) -> Result<(), ValidationError>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        // NaN is unordered, even against itself
        let comparable = value.partial_cmp(&value).is_some();
        if comparable && value >= min && value <= max {
            Ok(())
        } else {
            Err(ValidationError::with_value(
                field,
                format!("must be between {} and {}", min, max),
                value,
            ))
        }
    }

    /// Checks that one setting, in milliseconds, does not exceed another
    pub fn not_longer_than(
        value_ms: u64,
        field: &str,
        limit_ms: u64,
        limit_field: &str,
    ) -> Result<(), ValidationError> {
        if value_ms <= limit_ms {
            Ok(())
        } else {
            Err(ValidationError::with_value(
                field,
                format!("must not be longer than {} ({}ms)", limit_field, limit_ms),
                format!("{}ms", value_ms),
            ))
        }
    }

    pub fn collect_errors(
        results: Vec<Result<(), ValidationError>>,
    ) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<ValidationError> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
