//! bedrock-adapters: infrastructure adapters selected by connection URL.
//!
//! | concern | schemes |
//! |---------|---------|
//! | cache | `memory`, `redis://` |
//! | pubsub | `fake://`, `faker://`, `dummy://`, `memory`, `redis://` |
//! | secrets | `memory`, `vault+http://`, `vault+https://` |
//! | email | `resend://`, `faker://` |

pub mod cache;
pub mod email;
pub mod error;
pub mod idempotency;
pub mod pubsub;
pub mod secrets;

pub use cache::{cache_from_url, Cache, CacheExt, MemoryCache, RedisCache};
pub use email::{mailer_from_url, Email, FakeMailer, Mailer, ResendMailer};
pub use error::{AdapterError, AdapterResult};
pub use idempotency::{IdempotencyScope, IdempotencyStore, StoredResponse};
pub use pubsub::{handler, pubsub_from_url, FakePubSub, Handler, Message, PubSub, PubSubExt, PubSubStats, RedisPubSub};
pub use secrets::{secrets_from_url, MemorySecrets, SecretStore, VaultSecrets};
