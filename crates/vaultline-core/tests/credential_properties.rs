//! Property-based tests for the credential codec.
//!
//! These verify the two security-critical invariants for all inputs:
//! verify∘sign round-trips the subject under the configured key, and
//! algorithm/key-id pinning rejects tokens from any differently-configured
//! codec before signature verification.

use proptest::prelude::*;
use vaultline_core::{
    AuthError, ClaimsSpec, CredentialCodec, KeyMaterial,
    credential::{CodecConfig, CredentialAlgorithm},
};

fn hs256(secret: &[u8], key_id: Option<&str>) -> CredentialCodec {
    let config = CodecConfig { key_id: key_id.map(str::to_owned), ..CodecConfig::default() };
    CredentialCodec::new(config, KeyMaterial::Hs256 { secret: secret.to_vec() })
        .expect("HS256 codec construction is infallible")
}

/// Subjects the system actually uses: object-id-shaped and short usernames.
fn subject_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-f0-9]{24}",
        "[a-zA-Z][a-zA-Z0-9_-]{0,31}",
        (1u64..u64::MAX).prop_map(|n| n.to_string()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: for any subject and generation, verify(sign(claims))
    /// returns the same subject and generation.
    #[test]
    fn prop_sign_verify_round_trip(
        subject in subject_strategy(),
        generation in 0u64..1_000_000,
    ) {
        let codec = hs256(b"round-trip-secret", None);
        let token = codec.sign(&ClaimsSpec::new(subject.clone(), generation))
            .expect("signing succeeds with configured key");

        let claims = codec.verify(&token).expect("own token verifies");
        prop_assert_eq!(claims.subject, subject);
        prop_assert_eq!(claims.generation, generation);
    }

    /// Property: a token signed under a different secret never verifies.
    #[test]
    fn prop_foreign_secret_rejected(
        subject in subject_strategy(),
        secret in proptest::collection::vec(any::<u8>(), 16..64),
    ) {
        prop_assume!(secret != b"home-secret");
        let home = hs256(b"home-secret", None);
        let foreign = hs256(&secret, None);

        let token = foreign.sign(&ClaimsSpec::new(subject, 0))
            .expect("signing succeeds");
        prop_assert_eq!(home.verify(&token), Err(AuthError::BadSignature));
    }

    /// Property: key-id pinning rejects any token whose kid differs from
    /// configuration, even when the signature would verify.
    #[test]
    fn prop_key_id_pinning(
        subject in subject_strategy(),
        token_kid in "[a-z0-9]{1,8}",
        config_kid in "[a-z0-9]{1,8}",
    ) {
        prop_assume!(token_kid != config_kid);
        let signer = hs256(b"shared-secret", Some(&token_kid));
        let verifier = hs256(b"shared-secret", Some(&config_kid));

        let token = signer.sign(&ClaimsSpec::new(subject, 0))
            .expect("signing succeeds");
        prop_assert_eq!(verifier.verify(&token), Err(AuthError::UnexpectedKeyId));
    }

    /// Property: garbage input never panics and never verifies.
    #[test]
    fn prop_garbage_never_verifies(input in ".{0,256}") {
        let codec = hs256(b"garbage-secret", None);
        let result = codec.verify(&input);
        prop_assert!(result.is_err());
    }
}

#[test]
fn rs256_config_with_hs_material_is_rejected() {
    let config = CodecConfig { algorithm: CredentialAlgorithm::Rs256, ..CodecConfig::default() };
    let result = CredentialCodec::new(config, KeyMaterial::Hs256 { secret: b"s".to_vec() });
    assert!(result.is_err());
}
