//! Cookie secret generation.

use rand::Rng;
use rand::distributions::Uniform;

/// Length of a generated cookie secret.
pub const COOKIE_SECRET_LEN: usize = 30;

/// Generates a cookie secret of [`COOKIE_SECRET_LEN`] characters drawn
/// uniformly from `a`..=`z`.
pub fn generate_secret<R: Rng>(rng: &mut R) -> String {
    let letters = Uniform::new_inclusive(b'a', b'z');
    (0..COOKIE_SECRET_LEN)
        .map(|_| char::from(rng.sample(letters)))
        .collect()
}

/// Returns `true` if `value` has the shape of a generated secret.
#[must_use]
pub fn is_well_formed(value: &str) -> bool {
    value.len() == COOKIE_SECRET_LEN && value.bytes().all(|b| b.is_ascii_lowercase())
}
