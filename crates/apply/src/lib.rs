//! Forma apply: plan / create / update / delete of synthesized resources against the state store.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use forma_core::{SynthesizedState, Value, VersionToken};
use forma_persist::{now_ts, StoredState, Store};
use forma_registry::{Registry, ResourceType};
use forma_synth::{Synthesizer, TokenSource};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action { Create, Update, NoOp }

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self { Action::Create => "create", Action::Update => "update", Action::NoOp => "no-op" })
    }
}

/// Outcome of synthesizing a config and comparing it with what the store holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub address: String,
    pub type_name: String,
    pub action: Action,
    pub summary: DiffSummary,
    pub prior: Option<VersionToken>,
    pub state: SynthesizedState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub address: String,
    pub action: Action,
    pub applied: bool,
    pub version: VersionToken,
    pub prior: Option<VersionToken>,
    pub summary: DiffSummary,
}

/// Ties the registry, the synthesizer and a state store together.
pub struct Lifecycle<'a, S: Store + ?Sized, T: TokenSource = &'static forma_synth::WallClock> {
    registry: &'a Registry,
    store: &'a S,
    synth: Synthesizer<T>,
}

impl<'a, S: Store + ?Sized> Lifecycle<'a, S> {
    pub fn new(registry: &'a Registry, store: &'a S) -> Self {
        Self { registry, store, synth: Synthesizer::new() }
    }
}

impl<'a, S: Store + ?Sized, T: TokenSource> Lifecycle<'a, S, T> {
    pub fn with_synthesizer(registry: &'a Registry, store: &'a S, synth: Synthesizer<T>) -> Self {
        Self { registry, store, synth }
    }

    /// Synthesize `config` as `type_name` and diff it against the state stored at `address`.
    /// Validation failures come back as a [`forma_core::SynthesisError`] inside the `anyhow::Error`.
    pub fn plan(&self, address: &str, type_name: &str, config: &Value) -> Result<Plan> {
        let rt = self.registry.resolve(type_name)?;
        let prior = self.store.latest(address)?;
        if let Some(p) = &prior {
            if p.type_name != rt.type_name {
                return Err(anyhow!(
                    "address {} holds a {} resource, not {}; remove it first",
                    address, p.type_name, rt.type_name
                ));
            }
        }
        let state = self.synthesize(&rt, prior.as_ref().map(|p| &p.state), config)?;
        let target = manifest_json(&state.manifest)?;
        let (action, summary) = match &prior {
            None => (Action::Create, diff_summary(&target, &Json::Null)),
            Some(p) => {
                let base = manifest_json(&p.state.manifest)?;
                if p.state.manifest == state.manifest {
                    (Action::NoOp, DiffSummary::default())
                } else {
                    (Action::Update, diff_summary(&target, &base))
                }
            }
        };
        debug!(address, action = %action, adds = summary.adds, updates = summary.updates, removes = summary.removes, "planned");
        Ok(Plan {
            address: address.to_string(),
            type_name: rt.type_name.clone(),
            action,
            summary,
            prior: prior.map(|p| p.state.version),
            state,
        })
    }

    /// Plan, then write the new state unless nothing changed. `force` writes a fresh version anyway.
    pub fn apply(&self, address: &str, type_name: &str, config: &Value, force: bool) -> Result<ApplyResult> {
        let t0 = std::time::Instant::now();
        counter!("apply_attempts", 1u64);
        let plan = self.plan(address, type_name, config).map_err(|e| {
            counter!("apply_err", 1u64);
            e
        })?;
        if plan.action == Action::NoOp && !force {
            counter!("apply_noop", 1u64);
            info!(address, version = ?plan.prior, "unchanged, nothing to apply");
            return Ok(ApplyResult {
                address: plan.address,
                action: Action::NoOp,
                applied: false,
                version: plan.prior.unwrap_or(plan.state.version),
                prior: plan.prior,
                summary: plan.summary,
            });
        }
        let row = StoredState {
            address: plan.address.clone(),
            type_name: plan.type_name.clone(),
            ts: now_ts(),
            state: plan.state,
        };
        self.store.put_state(&row).with_context(|| format!("storing state for {}", address))?;
        histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("apply_ok", 1u64);
        info!(address, action = %plan.action, version = %row.state.version, "applied");
        Ok(ApplyResult {
            address: plan.address,
            action: plan.action,
            applied: true,
            version: row.state.version,
            prior: plan.prior,
            summary: plan.summary,
        })
    }

    /// Drop every stored state for `address`. Returns false when there was nothing to delete.
    pub fn delete(&self, address: &str) -> Result<bool> {
        let removed = self.store.remove(address)?;
        if removed > 0 {
            counter!("apply_delete", 1u64);
            info!(address, rows = removed, "deleted");
        }
        Ok(removed > 0)
    }

    fn synthesize(&self, rt: &ResourceType, prior: Option<&SynthesizedState>, config: &Value) -> Result<SynthesizedState> {
        let state = match prior {
            Some(p) => self.synth.resynthesize(p, &rt.schema, &rt.identity, config)?,
            None => self.synth.synthesize(&rt.schema, &rt.identity, config)?,
        };
        Ok(state)
    }
}

fn manifest_json(manifest: &str) -> Result<Json> {
    serde_yaml::from_str::<Json>(manifest).context("parsing stored manifest")
}

pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, adds: &mut usize, ups: &mut usize, rems: &mut usize) {
        use serde_json::Value as V;
        match (a, b) {
            (V::Object(ao), V::Object(bo)) => {
                for (k, av) in ao.iter() {
                    if let Some(bv) = bo.get(k) {
                        if av == bv { continue; }
                        walk(av, bv, adds, ups, rems);
                    } else {
                        *adds += 1;
                    }
                }
                for (k, _bv) in bo.iter() {
                    if !ao.contains_key(k) { *rems += 1; }
                }
            }
            (V::Array(aa), V::Array(bb)) => {
                let min_len = aa.len().min(bb.len());
                for i in 0..min_len { if aa[i] != bb[i] { *ups += 1; } }
                if aa.len() > bb.len() { *adds += aa.len() - bb.len(); }
                if bb.len() > aa.len() { *rems += bb.len() - aa.len(); }
            }
            // Nothing stored yet: every top-level key is an add
            (V::Object(ao), V::Null) => { *adds += ao.len(); }
            (av, bv) => { if av != bv { *ups += 1; } }
        }
    }
    let mut adds = 0usize; let mut ups = 0usize; let mut rems = 0usize;
    walk(target, base, &mut adds, &mut ups, &mut rems);
    DiffSummary { adds, updates: ups, removes: rems }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_summary_counts_adds_updates_removes() {
        let base = serde_json::json!({
            "a": 1,
            "b": { "x": 1 },
            "c": [1, 2, 3]
        });
        let target = serde_json::json!({
            "a": 2,                  // scalar update
            "b": { "x": 1, "y": 2 }, // object add
            "c": [1, 9],             // element update, one removal
            "d": true                // key add
        });
        let s = diff_summary(&target, &base);
        assert_eq!(s.adds, 2);
        assert_eq!(s.updates, 2);
        assert_eq!(s.removes, 1);
    }

    #[test]
    fn diff_against_nothing_counts_top_level_adds() {
        let target = serde_json::json!({"apiVersion": "v1", "kind": "K", "metadata": {"name": "x"}});
        assert_eq!(diff_summary(&target, &Json::Null), DiffSummary { adds: 3, updates: 0, removes: 0 });
        assert!(diff_summary(&target, &target).is_empty());
    }

    #[test]
    fn manifest_json_reads_yaml() {
        let j = manifest_json("apiVersion: v1\nkind: K\nspec:\n  n: 3\n").unwrap();
        assert_eq!(j["spec"]["n"], serde_json::json!(3));
        assert!(manifest_json("a: [").is_err());
    }
}
