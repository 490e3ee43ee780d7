//! Write authorization.
//!
//! Rules are configured per fact type. `any` admits every writer, `no`
//! admits none directly (such facts enter the graph only when they already
//! exist), and a signer rule is a specification walking from the candidate
//! fact to the user facts permitted to write it.

use std::collections::{HashMap, HashSet};

use tether_keystore::verify_envelope;
use tether_model::fact::{FactEnvelope, FactReference};
use tether_model::identity;
use tether_model::specification::Specification;
use tether_storage::{MemoryStore, Store};
use tracing::{debug, instrument};

use crate::errors::{AuthorizationError, AuthorizationResult};

#[cfg(test)]
#[path = "authorization_test.rs"]
mod authorization_test;

#[derive(Clone)]
enum Rule {
    Any,
    No,
    Signer(Specification),
}

/// The configured rule set, keyed by fact type.
#[derive(Clone, Default)]
pub struct AuthorizationRules {
    rules: HashMap<String, Vec<Rule>>,
}

impl AuthorizationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anyone may write facts of this type.
    pub fn any(mut self, fact_type: &str) -> Self {
        self.rules.entry(fact_type.to_string()).or_default().push(Rule::Any);
        self
    }

    /// No one may write facts of this type directly.
    pub fn no(mut self, fact_type: &str) -> Self {
        self.rules.entry(fact_type.to_string()).or_default().push(Rule::No);
        self
    }

    /// The writer's user fact must appear in the results of `specification`
    /// evaluated from the candidate fact.
    pub fn with(mut self, fact_type: &str, specification: Specification) -> Self {
        self.rules
            .entry(fact_type.to_string())
            .or_default()
            .push(Rule::Signer(specification));
        self
    }

    pub fn has_rule_for(&self, fact_type: &str) -> bool {
        self.rules.contains_key(fact_type)
    }
}

/// The verdict for one candidate fact. An acceptance under a signer rule
/// carries the permitted writers, so the envelope can shed signatures
/// attributed to anyone else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationVerdict {
    Accept,
    AcceptBySigners(Vec<FactReference>),
    Existing,
    Reject(String),
}

pub struct AuthorizationEngine<'a> {
    rules: &'a AuthorizationRules,
    store: &'a dyn Store,
}

impl<'a> AuthorizationEngine<'a> {
    pub fn new(rules: &'a AuthorizationRules, store: &'a dyn Store) -> Self {
        Self { rules, store }
    }

    /// Authorizes a batch. A single rejection fails the whole batch; the
    /// accepted envelopes retain only the signatures that verified.
    ///
    /// Rule specifications are evaluated against the in-flight batch merged
    /// with the stored closure of its external predecessors, so a rule can
    /// walk from a candidate through predecessors that arrive in the same
    /// batch.
    #[instrument(skip_all, fields(batch = envelopes.len()), err)]
    pub async fn authorize(
        &self,
        user: Option<&FactReference>,
        envelopes: Vec<FactEnvelope>,
    ) -> AuthorizationResult<Vec<FactEnvelope>> {
        let mut verified: Vec<FactEnvelope> =
            envelopes.into_iter().map(verify_envelope).collect();

        let overlay = self.batch_overlay(&verified).await?;
        let references: Vec<FactReference> =
            verified.iter().map(|envelope| envelope.fact.reference()).collect();
        let existing: HashSet<FactReference> =
            self.store.which_exist(&references).await?.into_iter().collect();

        for envelope in &mut verified {
            let reference = envelope.fact.reference();
            let verdict = self
                .evaluate(user, &overlay, &envelope.fact.fact_type, &reference, &existing)
                .await?;
            match verdict {
                AuthorizationVerdict::Reject(reason) => {
                    return Err(AuthorizationError::Forbidden(format!(
                        "cannot write {}: {reason}",
                        envelope.fact.fact_type
                    )));
                }
                AuthorizationVerdict::AcceptBySigners(permitted) => {
                    // Only signatures attributed to a permitted writer stay
                    // on the envelope.
                    let permitted: HashSet<FactReference> = permitted.into_iter().collect();
                    envelope.signatures.retain(|signature| {
                        permitted
                            .contains(&identity::user_fact(&signature.public_key).reference())
                    });
                    debug!(fact_type = %envelope.fact.fact_type, "fact admitted by signer rule");
                }
                admitted => {
                    debug!(fact_type = %envelope.fact.fact_type, ?admitted, "fact admitted");
                }
            }
        }
        Ok(verified)
    }

    async fn evaluate(
        &self,
        user: Option<&FactReference>,
        overlay: &MemoryStore,
        fact_type: &str,
        reference: &FactReference,
        existing: &HashSet<FactReference>,
    ) -> AuthorizationResult<AuthorizationVerdict> {
        let Some(rules) = self.rules.rules.get(fact_type) else {
            return Ok(AuthorizationVerdict::Reject(
                "no authorization rule covers this type".to_string(),
            ));
        };
        let mut last_reason = String::new();
        for rule in rules {
            match rule {
                Rule::Any => return Ok(AuthorizationVerdict::Accept),
                Rule::No => {
                    if existing.contains(reference) {
                        return Ok(AuthorizationVerdict::Existing);
                    }
                    last_reason = "the type cannot be written directly".to_string();
                }
                Rule::Signer(specification) => {
                    let Some(user) = user else {
                        last_reason = "an authenticated user is required".to_string();
                        continue;
                    };
                    let results = overlay
                        .read(std::slice::from_ref(reference), specification)
                        .await?;
                    let permitted: Vec<FactReference> = results
                        .iter()
                        .flat_map(|result| result.tuple.values().cloned())
                        .collect();
                    if permitted.contains(user) {
                        return Ok(AuthorizationVerdict::AcceptBySigners(permitted));
                    }
                    last_reason = "the user is not a permitted writer".to_string();
                }
            }
        }
        Ok(AuthorizationVerdict::Reject(last_reason))
    }

    /// A throwaway store holding the batch and the stored closure of its
    /// external predecessors. Rule walks resolve against it without
    /// mutating the real store.
    async fn batch_overlay(&self, envelopes: &[FactEnvelope]) -> AuthorizationResult<MemoryStore> {
        let externals: Vec<FactReference> = {
            let in_batch: HashSet<FactReference> =
                envelopes.iter().map(|e| e.fact.reference()).collect();
            let mut seen = HashSet::new();
            envelopes
                .iter()
                .flat_map(|e| e.fact.predecessor_references())
                .filter(|reference| {
                    !in_batch.contains(reference) && seen.insert(reference.clone())
                })
                .collect()
        };

        let overlay = MemoryStore::new();
        let mut seed = self.store.load(&externals).await?;
        seed.extend(envelopes.iter().cloned());
        overlay.save(seed).await?;
        Ok(overlay)
    }
}
