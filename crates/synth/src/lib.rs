//! Forma synthesizer: validate a config against a schema, stamp the resource identity
//! and a fresh version token, and serialize the result as a YAML manifest.
//!
//! Synthesis is pure apart from the version clock; a [`Synthesizer`] can be shared
//! freely between threads.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use forma_core::{ResourceIdentity, SynthesisError, SynthesizedState, Value, VersionToken};
use forma_schema::ResourceSchema;
use metrics::{counter, histogram};
use tracing::debug;

pub mod manifest;

pub use manifest::{decode_manifest, render_manifest, DecodeError};

/// Source of version tokens.
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> VersionToken;
}

impl<T: TokenSource + ?Sized> TokenSource for &T {
    fn next_token(&self) -> VersionToken { (**self).next_token() }
}

/// Nanosecond wall clock that never hands out the same (or a smaller) token twice.
#[derive(Debug, Default)]
pub struct WallClock {
    last: AtomicU64,
}

impl WallClock {
    pub const fn new() -> Self { Self { last: AtomicU64::new(0) } }
}

fn now_nanos() -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(now.as_nanos()).unwrap_or(u64::MAX)
}

impl TokenSource for WallClock {
    fn next_token(&self) -> VersionToken {
        let now = now_nanos();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev.saturating_add(1));
            match self.last.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return VersionToken(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

static PROCESS_CLOCK: WallClock = WallClock::new();

pub struct Synthesizer<T: TokenSource = &'static WallClock> {
    tokens: T,
}

impl Default for Synthesizer {
    fn default() -> Self { Self::new() }
}

impl Synthesizer {
    /// Synthesizer backed by the process-wide clock.
    pub fn new() -> Self { Self { tokens: &PROCESS_CLOCK } }
}

impl<T: TokenSource> Synthesizer<T> {
    pub fn with_tokens(tokens: T) -> Self { Self { tokens } }

    /// Validate, inject identity, stamp a version and serialize.
    pub fn synthesize(&self, schema: &ResourceSchema, identity: &ResourceIdentity, config: &Value) -> Result<SynthesizedState, SynthesisError> {
        self.run(schema, identity, config, None)
    }

    /// Same as [`synthesize`](Self::synthesize), but the token is guaranteed to be newer than `prior`'s.
    pub fn resynthesize(
        &self,
        prior: &SynthesizedState,
        schema: &ResourceSchema,
        identity: &ResourceIdentity,
        config: &Value,
    ) -> Result<SynthesizedState, SynthesisError> {
        self.run(schema, identity, config, Some(prior.version))
    }

    fn run(
        &self,
        schema: &ResourceSchema,
        identity: &ResourceIdentity,
        config: &Value,
        floor: Option<VersionToken>,
    ) -> Result<SynthesizedState, SynthesisError> {
        let t0 = std::time::Instant::now();
        counter!("synth_attempts", 1u64);
        let errs = schema.validate(config);
        if !errs.is_empty() {
            counter!("synth_invalid", 1u64);
            debug!(kind = %identity.kind, errors = errs.len(), "config rejected");
            return Err(SynthesisError::Validation(errs));
        }
        let manifest = render_manifest(schema, identity, config).map_err(|e| {
            counter!("synth_internal_err", 1u64);
            SynthesisError::from(e)
        })?;
        let mut version = self.tokens.next_token();
        if let Some(floor) = floor {
            if version <= floor {
                version = VersionToken(floor.0.saturating_add(1));
            }
        }
        histogram!("synth_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("synth_ok", 1u64);
        debug!(identity = %identity, version = %version, bytes = manifest.len(), "synthesized manifest");
        Ok(SynthesizedState {
            version,
            api_version: identity.api_version.clone(),
            kind: identity.kind.clone(),
            manifest,
        })
    }
}

/// Synthesize with the process-wide clock.
pub fn synthesize(schema: &ResourceSchema, identity: &ResourceIdentity, config: &Value) -> Result<SynthesizedState, SynthesisError> {
    Synthesizer::new().synthesize(schema, identity, config)
}
