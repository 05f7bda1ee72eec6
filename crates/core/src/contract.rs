//! Internal contract checks
//!
//! Invariant checks that run in debug builds and compile out of release
//! builds. A failed check panics with a `ContractViolation` message, which
//! is distinct from every user-facing error kind: hitting one means a bug
//! in Rillet, not misuse.

/// Check a precondition at a function boundary (debug builds only)
#[macro_export]
macro_rules! precondition {
    ($cond:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            if !$cond {
                panic!(
                    "{}",
                    $crate::error::RilletError::ContractViolation(
                        format!("precondition failed: {}", format_args!($($arg)+))
                    )
                );
            }
        }
    };
}

/// Check an internal invariant (debug builds only)
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            if !$cond {
                panic!(
                    "{}",
                    $crate::error::RilletError::ContractViolation(
                        format!("invariant failed: {}", format_args!($($arg)+))
                    )
                );
            }
        }
    };
}

/// Check a postcondition before returning (debug builds only)
#[macro_export]
macro_rules! postcondition {
    ($cond:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            if !$cond {
                panic!(
                    "{}",
                    $crate::error::RilletError::ContractViolation(
                        format!("postcondition failed: {}", format_args!($($arg)+))
                    )
                );
            }
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_passing_checks_are_silent() {
        precondition!(1 + 1 == 2, "arithmetic holds");
        invariant!(true, "always");
        postcondition!(!false, "never false");
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic(expected = "contract violation")]
    fn test_failing_invariant_panics_with_contract_violation() {
        invariant!(false, "multiplicity {} went negative", -1);
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic(expected = "precondition failed")]
    fn test_failing_precondition_names_the_kind() {
        precondition!(false, "limit must be non-negative");
    }
}
