//! Random credential generation for provisioned services.

use rand::Rng;
use rand::distr::{Alphanumeric, SampleString};

/// Shortest credential produced by [`RandomPasswords`].
pub const MIN_PASSWORD_LEN: usize = 40;
/// Longest credential produced by [`RandomPasswords`].
pub const MAX_PASSWORD_LEN: usize = 50;

/// Source of credential strings.
pub trait PasswordGenerator {
    /// Returns a fresh credential.
    fn generate(&self) -> String;
}

/// Uniformly random ASCII alphanumeric credentials of 40 to 50 characters.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomPasswords;

impl PasswordGenerator for RandomPasswords {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        let len = rng.random_range(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN);
        Alphanumeric.sample_string(&mut rng, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn passwords_are_alphanumeric_and_bounded() {
        for _ in 0..200 {
            let password = RandomPasswords.generate();
            assert!(
                (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()),
                "unexpected length {}",
                password.len()
            );
            assert!(password.chars().all(|ch| ch.is_ascii_alphanumeric()));
        }
    }

    #[rstest]
    fn consecutive_passwords_differ() {
        assert_ne!(RandomPasswords.generate(), RandomPasswords.generate());
    }
}
