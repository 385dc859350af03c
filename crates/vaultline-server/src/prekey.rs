//! Prekey bundle broker: publication and single-use claims.
//!
//! Principals publish a bundle of public key material so peers can start
//! an asynchronous encrypted session with them. Each bundle carries a pool
//! of one-time prekeys that must be handed out at most once each; the
//! broker enforces that with a conditional update against the store and
//! surfaces lost races as [`PrekeyError::Conflict`] so callers can retry.
//!
//! Who may claim is the owner's call: themselves always, everyone when
//! `allowAnyRequester` is set, an explicit allowlist, or anyone who shares
//! a channel with the owner when the requester names one.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    channel_id,
    store::{BundleStore, MembershipStore, OneTimePreKey, SignedPreKey, StoreError, StoredBundle},
};

/// Shortest accepted base64 field, in encoded characters.
pub const MIN_KEY_LEN: usize = 16;
/// Longest accepted base64 field, in encoded characters.
pub const MAX_KEY_LEN: usize = 512;
/// Upper bound on one-time prekeys per upload.
pub const MAX_ONE_TIME_KEYS: usize = 100;

/// Errors from publishing or claiming bundles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrekeyError {
    /// The upload failed shape validation. The field name is included.
    #[error("invalid prekey payload: {0}")]
    InvalidPayload(&'static str),

    /// The requester is not authorized to claim this owner's bundle.
    #[error("requester not authorized for this bundle")]
    Forbidden,

    /// The owner has not published a bundle.
    #[error("no bundle published for principal")]
    NotFound,

    /// Every one-time prekey has been handed out.
    #[error("one-time prekeys exhausted")]
    NoPreKeysAvailable,

    /// A concurrent claim took the selected key first. Retry.
    #[error("one-time prekey claimed concurrently")]
    Conflict,

    /// The bundle store could not answer.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An uploaded bundle, pre-validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleUpload {
    /// Long-term identity key, base64.
    pub identity_key: String,
    /// Medium-term signed prekey.
    pub signed_pre_key: SignedPreKey,
    /// Single-use prekeys. May be empty.
    #[serde(default)]
    pub one_time_pre_keys: Vec<OneTimePreKey>,
    /// Whether any authenticated principal may claim.
    #[serde(default)]
    pub allow_any_requester: bool,
    /// Principals allowed to claim when `allow_any_requester` is off.
    #[serde(default)]
    pub allowed_requesters: Vec<String>,
}

/// Requester-supplied context for a claim.
#[derive(Debug, Clone, Default)]
pub struct ClaimContext {
    /// Channel the requester says they share with the owner. Grants access
    /// only if both parties are actually members.
    pub channel_id: Option<String>,
}

/// A successful claim: the bundle's public half plus the consumed
/// one-time prekey.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedBundle {
    /// Owner's identity key, base64.
    pub identity_key: String,
    /// Owner's signed prekey.
    pub signed_pre_key: SignedPreKey,
    /// The one-time prekey reserved for this requester.
    pub one_time_pre_key: OneTimePreKey,
}

/// Brokers prekey bundle publication and claims.
#[derive(Debug, Clone)]
pub struct PrekeyBundleBroker<B, M>
where
    B: BundleStore,
    M: MembershipStore,
{
    bundles: B,
    memberships: M,
}

impl<B, M> PrekeyBundleBroker<B, M>
where
    B: BundleStore,
    M: MembershipStore,
{
    /// Create a broker over the given stores.
    pub fn new(bundles: B, memberships: M) -> Self {
        Self { bundles, memberships }
    }

    /// Validate and store a bundle, replacing any previous one. All
    /// one-time keys start unused, including key ids reused from an
    /// earlier upload.
    pub fn publish(&self, owner_id: &str, upload: BundleUpload) -> Result<(), PrekeyError> {
        let identity_key = sanitize_base64(&upload.identity_key, "identityKey")?;
        let signed_pre_key = SignedPreKey {
            key_id: upload.signed_pre_key.key_id,
            public_key: sanitize_base64(&upload.signed_pre_key.public_key, "signedPreKey.publicKey")?,
            signature: sanitize_base64(&upload.signed_pre_key.signature, "signedPreKey.signature")?,
        };

        if upload.one_time_pre_keys.len() > MAX_ONE_TIME_KEYS {
            return Err(PrekeyError::InvalidPayload("oneTimePreKeys"));
        }
        let mut one_time_pre_keys = Vec::with_capacity(upload.one_time_pre_keys.len());
        for key in &upload.one_time_pre_keys {
            one_time_pre_keys.push(OneTimePreKey {
                key_id: key.key_id,
                public_key: sanitize_base64(&key.public_key, "oneTimePreKeys.publicKey")?,
                used: false,
            });
        }

        let policy = crate::store::AccessPolicy {
            allow_any_requester: upload.allow_any_requester,
            allowed_requesters: upload.allowed_requesters.into_iter().collect(),
        };

        let stored = StoredBundle {
            identity_key,
            signed_pre_key,
            one_time_pre_keys,
            policy,
        };
        self.bundles.replace_bundle(owner_id, stored)?;
        tracing::debug!(owner = %owner_id, "prekey bundle published");
        Ok(())
    }

    /// Claim the owner's bundle, consuming exactly one one-time prekey.
    ///
    /// The selected key is the unused one with the lowest key id. The
    /// flip from unused to used is a conditional update; losing the race
    /// surfaces as [`PrekeyError::Conflict`] and the caller should retry,
    /// which will select the next key.
    pub fn claim(
        &self,
        requester_id: &str,
        owner_id: &str,
        context: &ClaimContext,
    ) -> Result<ClaimedBundle, PrekeyError> {
        let bundle = self.bundles.load_bundle(owner_id)?.ok_or(PrekeyError::NotFound)?;

        if !self.authorized(requester_id, owner_id, &bundle, context)? {
            tracing::debug!(requester = %requester_id, owner = %owner_id, "prekey claim refused");
            return Err(PrekeyError::Forbidden);
        }

        let selected = bundle
            .one_time_pre_keys
            .iter()
            .filter(|key| !key.used)
            .min_by_key(|key| key.key_id)
            .ok_or(PrekeyError::NoPreKeysAvailable)?
            .clone();

        if !self.bundles.consume_one_time_key(owner_id, selected.key_id)? {
            return Err(PrekeyError::Conflict);
        }

        tracing::debug!(
            requester = %requester_id,
            owner = %owner_id,
            key_id = selected.key_id,
            "one-time prekey claimed"
        );
        Ok(ClaimedBundle {
            identity_key: bundle.identity_key,
            signed_pre_key: bundle.signed_pre_key,
            one_time_pre_key: OneTimePreKey { used: true, ..selected },
        })
    }

    fn authorized(
        &self,
        requester_id: &str,
        owner_id: &str,
        bundle: &StoredBundle,
        context: &ClaimContext,
    ) -> Result<bool, PrekeyError> {
        if requester_id == owner_id
            || bundle.policy.allow_any_requester
            || bundle.policy.allowed_requesters.contains(requester_id)
        {
            return Ok(true);
        }
        if let Some(channel) = context.channel_id.as_deref()
            && channel_id::is_well_formed(channel)
            && self.memberships.is_member(channel, requester_id)?
            && self.memberships.is_member(channel, owner_id)?
        {
            return Ok(true);
        }
        Ok(false)
    }
}

/// Accept a base64 field only in its canonical standard-alphabet form.
///
/// Rejects whitespace, out-of-range lengths, non-multiple-of-4 lengths,
/// padding in the middle, and any encoding that does not round-trip to
/// the identical string.
fn sanitize_base64(value: &str, field: &'static str) -> Result<String, PrekeyError> {
    let invalid = || PrekeyError::InvalidPayload(field);

    if value.len() < MIN_KEY_LEN || value.len() > MAX_KEY_LEN || value.len() % 4 != 0 {
        return Err(invalid());
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
    {
        return Err(invalid());
    }
    let decoded = BASE64.decode(value).map_err(|_| invalid())?;
    if BASE64.encode(&decoded) != value {
        return Err(invalid());
    }
    Ok(value.to_owned())
}
