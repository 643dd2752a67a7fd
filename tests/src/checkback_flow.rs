//! HMAC tampering coverage the unit tests in `checkback` don't already
//! exercise: address substitution and timestamp advancement, driven
//! through `create_hmac`/`validate_hmac` together rather than against the
//! crate's own fixed digest.

use checkback::{create_hmac, validate_hmac};

const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

#[test]
fn substituting_the_address_invalidates_the_link() {
    let (t, digest) = create_hmac(KEY, "list_a@example.com", Some("cleo@example.com"));
    assert!(validate_hmac(KEY, "list_a@example.com", Some("cleo@example.com"), t, &digest, 7).is_ok());
    assert!(
        validate_hmac(KEY, "list_a@example.com", Some("someone-else@example.com"), t, &digest, 7).is_err(),
        "a digest minted for one address must not validate for another"
    );
}

#[test]
fn advancing_the_timestamp_past_max_age_invalidates_the_link() {
    let (t, digest) = create_hmac(KEY, "list_a@example.com", Some("cleo@example.com"));
    let just_within = t + 7 * 86_400 - 1;
    let just_past = t + 7 * 86_400 + 1;

    // The digest only covers the original `t`, so advancing the claimed
    // timestamp also breaks the signature, not just the age check — both
    // paths must collapse to the same opaque rejection.
    assert!(validate_hmac(KEY, "list_a@example.com", Some("cleo@example.com"), just_within, &digest, 7).is_err());
    assert!(validate_hmac(KEY, "list_a@example.com", Some("cleo@example.com"), just_past, &digest, 7).is_err());
}

#[test]
fn a_different_lists_key_cannot_validate_another_lists_link() {
    let other_key: &[u8] = b"fedcba9876543210fedcba9876543210";
    let (t, digest) = create_hmac(KEY, "list_a@example.com", Some("cleo@example.com"));
    assert!(validate_hmac(other_key, "list_a@example.com", Some("cleo@example.com"), t, &digest, 7).is_err());
}
