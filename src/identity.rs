use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::puzzle_config::Variant;
use crate::storage::{LocalStore, USERNAME_KEY, USER_ID_KEY, VARIANT_KEY};

pub const FEATURE_FLAG_KEY: &str = "word_search_difficulty_v2";
pub const CONTROL_BUCKET: &str = "control";
pub const FOUR_WORDS_BUCKET: &str = "4-words";

const ADJECTIVES: [&str; 10] = [
    "Lightning", "Swift", "Quick", "Speedy", "Rapid", "Fast", "Blazing", "Turbo", "Sonic", "Flash",
];
const ANIMALS: [&str; 10] = [
    "Leopard", "Cheetah", "Falcon", "Hawk", "Fox", "Wolf", "Tiger", "Eagle", "Panther", "Gazelle",
];

/// Stable per-profile visitor identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub variant: Variant,
}

/// Identity plus the flag it was bucketed by; handed to the tracker
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentContext {
    pub identity: Identity,
    pub flag_key: String,
    pub flag_response: Option<String>,
}

/// What to do when the flag source gives no usable bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum VariantPolicy {
    /// Refuse to start the puzzle
    #[default]
    Strict,
    /// Coin flip, kept for parity with the first widget release
    RandomFallback,
}

/// External service resolving which bucket a visitor is in
pub trait FlagSource {
    fn flag_value(&self, key: &str, distinct_id: &str) -> Result<Option<String>>;
}

/// Flag value fixed at startup (CLI, config or environment)
#[derive(Debug, Clone, Default)]
pub struct StaticFlagSource {
    value: Option<String>,
}

impl StaticFlagSource {
    pub fn new(value: Option<String>) -> Self {
        Self { value }
    }
}

impl FlagSource for StaticFlagSource {
    fn flag_value(&self, _key: &str, _distinct_id: &str) -> Result<Option<String>> {
        Ok(self.value.clone())
    }
}

#[derive(Debug, Deserialize)]
struct FlagResponse {
    value: Option<String>,
}

/// `GET {base}/api/flags/{key}?distinct_id=..` -> `{"value": ".."}`
#[derive(Debug, Clone)]
pub struct HttpFlagSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpFlagSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl FlagSource for HttpFlagSource {
    fn flag_value(&self, key: &str, distinct_id: &str) -> Result<Option<String>> {
        let url = format!("{}/api/flags/{}", self.base_url, key);
        let response = self
            .client
            .get(&url)
            .query(&[("distinct_id", distinct_id)])
            .send()?;
        if !response.status().is_success() {
            return Err(Error::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(response.json::<FlagResponse>()?.value)
    }
}

/// Map a raw flag response onto a variant
pub fn variant_for_bucket(bucket: &str) -> Option<Variant> {
    match bucket {
        CONTROL_BUCKET => Some(Variant::A),
        FOUR_WORDS_BUCKET => Some(Variant::B),
        _ => None,
    }
}

pub fn generate_username<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Swift");
    let animal = ANIMALS.choose(rng).copied().unwrap_or("Fox");
    format!("{adjective} {animal}")
}

pub fn generate_user_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("user_{suffix}")
}

/// Resolves and persists the visitor identity
pub struct IdentityAssigner<'a, F: FlagSource, S: LocalStore> {
    flags: &'a F,
    store: &'a mut S,
    policy: VariantPolicy,
}

impl<'a, F: FlagSource, S: LocalStore> IdentityAssigner<'a, F, S> {
    pub fn new(flags: &'a F, store: &'a mut S, policy: VariantPolicy) -> Self {
        Self {
            flags,
            store,
            policy,
        }
    }

    /// Reuse the stored id and username (creating them on first run), then
    /// bucket the visitor. Strict policy fails on a missing or unknown bucket.
    pub fn resolve(&mut self) -> Result<ExperimentContext> {
        let mut rng = rand::thread_rng();

        let user_id = match self.store.get_json::<String>(USER_ID_KEY)? {
            Some(id) => id,
            None => {
                let id = generate_user_id(&mut rng);
                self.store.set_json(USER_ID_KEY, &id)?;
                id
            }
        };
        let username = match self.store.get_json::<String>(USERNAME_KEY)? {
            Some(name) => name,
            None => {
                let name = generate_username(&mut rng);
                self.store.set_json(USERNAME_KEY, &name)?;
                name
            }
        };

        let flag_response = match self.flags.flag_value(FEATURE_FLAG_KEY, &user_id) {
            Ok(value) => value,
            Err(e) if self.policy == VariantPolicy::Strict => {
                return Err(Error::Configuration(format!(
                    "flag source unavailable: {e}"
                )))
            }
            Err(e) => {
                warn!(error = %e, "flag source unavailable");
                None
            }
        };

        let variant = match flag_response.as_deref().and_then(variant_for_bucket) {
            Some(variant) => variant,
            None => match self.policy {
                VariantPolicy::Strict => {
                    return Err(Error::Configuration(format!(
                        "flag {FEATURE_FLAG_KEY} resolved to {flag_response:?}, expected \
                         \"{CONTROL_BUCKET}\" or \"{FOUR_WORDS_BUCKET}\""
                    )))
                }
                VariantPolicy::RandomFallback => {
                    let variant = if rng.gen_bool(0.5) { Variant::A } else { Variant::B };
                    warn!(got = ?flag_response, %variant, "flag not resolved, using random assignment");
                    variant
                }
            },
        };
        self.store.set_json(VARIANT_KEY, &variant)?;

        info!(%user_id, %username, %variant, "visitor identified");
        Ok(ExperimentContext {
            identity: Identity {
                user_id,
                username,
                variant,
            },
            flag_key: FEATURE_FLAG_KEY.to_string(),
            flag_response,
        })
    }

    /// Pick a fresh username; collisions with other visitors are tolerated
    pub fn regenerate_username(&mut self) -> Result<String> {
        let name = generate_username(&mut rand::thread_rng());
        self.store.set_json(USERNAME_KEY, &name)?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use assert_matches::assert_matches;

    struct DownFlagSource;

    impl FlagSource for DownFlagSource {
        fn flag_value(&self, _key: &str, _distinct_id: &str) -> Result<Option<String>> {
            Err(Error::Configuration("connection refused".into()))
        }
    }

    #[test]
    fn buckets_map_to_variants() {
        assert_eq!(variant_for_bucket("control"), Some(Variant::A));
        assert_eq!(variant_for_bucket("4-words"), Some(Variant::B));
        assert_eq!(variant_for_bucket("test"), None);
    }

    #[test]
    fn generated_names_have_expected_shape() {
        let mut rng = rand::thread_rng();
        let id = generate_user_id(&mut rng);
        assert!(id.starts_with("user_"));
        assert_eq!(id.len(), 14);

        let name = generate_username(&mut rng);
        let (adjective, animal) = name.split_once(' ').unwrap();
        assert!(ADJECTIVES.contains(&adjective));
        assert!(ANIMALS.contains(&animal));
    }

    #[test]
    fn resolve_persists_and_reuses_identity() {
        let mut store = MemoryStore::new();
        let flags = StaticFlagSource::new(Some("4-words".into()));

        let first = IdentityAssigner::new(&flags, &mut store, VariantPolicy::Strict)
            .resolve()
            .unwrap();
        assert_eq!(first.identity.variant, Variant::B);
        assert_eq!(first.flag_response.as_deref(), Some("4-words"));

        let second = IdentityAssigner::new(&flags, &mut store, VariantPolicy::Strict)
            .resolve()
            .unwrap();
        assert_eq!(first.identity, second.identity);

        let stored: Option<Variant> = store.get_json(VARIANT_KEY).unwrap();
        assert_eq!(stored, Some(Variant::B));
    }

    #[test]
    fn strict_policy_rejects_unknown_bucket() {
        let mut store = MemoryStore::new();
        let flags = StaticFlagSource::new(Some("treatment".into()));
        let result = IdentityAssigner::new(&flags, &mut store, VariantPolicy::Strict).resolve();
        assert_matches!(result, Err(Error::Configuration(_)));
        assert_eq!(store.get(VARIANT_KEY).unwrap(), None);
    }

    #[test]
    fn strict_policy_rejects_missing_flag_and_outage() {
        let mut store = MemoryStore::new();
        let missing = StaticFlagSource::new(None);
        assert_matches!(
            IdentityAssigner::new(&missing, &mut store, VariantPolicy::Strict).resolve(),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            IdentityAssigner::new(&DownFlagSource, &mut store, VariantPolicy::Strict).resolve(),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn fallback_policy_always_assigns() {
        let mut store = MemoryStore::new();
        let ctx = IdentityAssigner::new(&DownFlagSource, &mut store, VariantPolicy::RandomFallback)
            .resolve()
            .unwrap();
        assert!(Variant::ALL.contains(&ctx.identity.variant));
        assert_eq!(ctx.flag_response, None);
    }

    #[test]
    fn regenerate_username_overwrites_store() {
        let mut store = MemoryStore::new();
        let flags = StaticFlagSource::new(Some("control".into()));
        let mut assigner = IdentityAssigner::new(&flags, &mut store, VariantPolicy::Strict);
        assigner.resolve().unwrap();
        let renamed = assigner.regenerate_username().unwrap();
        let stored: Option<String> = store.get_json(USERNAME_KEY).unwrap();
        assert_eq!(stored, Some(renamed));
    }
}
