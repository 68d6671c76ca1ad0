//! CP-008: Executor: walk a compiled plan and provision each resource.
//!
//! For each resource in plan order: bind references against the attributes
//! already reported → provision → record attributes → events. A resource
//! whose dependency failed (or was itself skipped) is skipped, never
//! attempted. Under `stop_on_first` the first failure halts the run.

use super::parser::CompiledStack;
use super::resolver;
use super::types::*;
use crate::provenance::{eventlog, hasher};
use crate::provider::{BoundResource, Provisioner};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::time::Instant;

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub stack: &'a CompiledStack,
    /// Event log root; `None` disables the log regardless of policy
    pub log_dir: Option<&'a Path>,
}

/// Event log sink for one run.
struct EventSink<'a> {
    log_dir: Option<&'a Path>,
    stack: &'a str,
}

impl EventSink<'_> {
    fn enabled(&self) -> bool {
        self.log_dir.is_some()
    }

    fn append(&self, event: ProvenanceEvent) -> Result<(), String> {
        match self.log_dir {
            Some(dir) => eventlog::append_event(dir, self.stack, event),
            None => Ok(()),
        }
    }

    /// Mid-run events never abort the run.
    fn record(&self, event: ProvenanceEvent) {
        if let Err(e) = self.append(event) {
            tracing::warn!(stack = %self.stack, error = %e, "event log write failed");
        }
    }
}

/// Execute the plan of a compiled stack.
pub fn apply(cfg: &ApplyConfig, provisioner: &mut dyn Provisioner) -> Result<ApplyReport, String> {
    let start = Instant::now();
    let stack = cfg.stack;
    let run_id = eventlog::generate_run_id();
    let events = EventSink {
        log_dir: cfg.log_dir.filter(|_| stack.policy.provenance),
        stack: &stack.name,
    };

    tracing::info!(
        stack = %stack.name,
        run_id = %run_id,
        provisioner = provisioner.name(),
        resources = stack.plan.len(),
        provenance = events.enabled(),
        "apply started"
    );
    events.append(ProvenanceEvent::ApplyStarted {
        stack: stack.name.clone(),
        run_id: run_id.clone(),
        provisioner: provisioner.name().to_string(),
        cloudplan_version: env!("CARGO_PKG_VERSION").to_string(),
    })?;

    let mut outcomes: IndexMap<String, ResourceOutcome> = IndexMap::new();
    let mut attributes: IndexMap<String, Attributes> = IndexMap::new();
    // Failed or skipped resource → the failed resource at the root of it.
    let mut unhealthy: FxHashMap<&str, String> = FxHashMap::default();
    let mut halted_by: Option<String> = None;

    for id in &stack.plan.order {
        if let Some(root) = &halted_by {
            events.record(ProvenanceEvent::ResourceSkipped {
                stack: stack.name.clone(),
                resource: id.clone(),
                blocked_by: root.clone(),
            });
            outcomes.insert(id.clone(), ResourceOutcome::Halted);
            continue;
        }

        let Some(descriptor) = stack.graph.get(id) else {
            return Err(format!("plan names unknown resource '{}'", id));
        };

        let blocked = stack
            .graph
            .dependencies(id)
            .find_map(|dep| unhealthy.get(dep.as_str()).cloned());
        if let Some(root) = blocked {
            tracing::warn!(resource = %id, blocked_by = %root, "skipped");
            events.record(ProvenanceEvent::ResourceSkipped {
                stack: stack.name.clone(),
                resource: id.clone(),
                blocked_by: root.clone(),
            });
            unhealthy.insert(id, root.clone());
            outcomes.insert(id.clone(), ResourceOutcome::Skipped { blocked_by: root });
            continue;
        }

        events.record(ProvenanceEvent::ResourceStarted {
            stack: stack.name.clone(),
            resource: id.clone(),
            kind: descriptor.kind.to_string(),
        });
        let resource_start = Instant::now();

        let result = resolver::bind_properties(&descriptor.properties, &attributes)
            .map_err(|e| format!("binding failed: {}", e))
            .and_then(|properties| {
                let bound = BoundResource {
                    stack: stack.name.clone(),
                    logical_id: id.clone(),
                    kind: descriptor.kind,
                    properties,
                };
                let attrs = provisioner.provision(&bound)?;
                Ok((bound, attrs))
            });
        let duration = resource_start.elapsed().as_secs_f64();

        match result {
            Ok((bound, attrs)) => {
                let hash = hasher::hash_json(&bound.properties);
                tracing::info!(resource = %id, kind = %descriptor.kind, duration, "provisioned");
                events.record(ProvenanceEvent::ResourceProvisioned {
                    stack: stack.name.clone(),
                    resource: id.clone(),
                    duration_seconds: duration,
                    hash,
                });
                attributes.insert(id.clone(), attrs);
                outcomes.insert(id.clone(), ResourceOutcome::Provisioned);
            }
            Err(error) => {
                tracing::error!(resource = %id, error = %error, "provisioning failed");
                events.record(ProvenanceEvent::ResourceFailed {
                    stack: stack.name.clone(),
                    resource: id.clone(),
                    error: error.clone(),
                });
                unhealthy.insert(id, id.clone());
                outcomes.insert(id.clone(), ResourceOutcome::Failed { error });
                if stack.policy.failure == FailurePolicy::StopOnFirst {
                    tracing::warn!(resource = %id, "stopping after first failure");
                    halted_by = Some(id.clone());
                }
            }
        }
    }

    let outputs = bind_outputs(&stack.outputs, &attributes);

    let report = ApplyReport {
        stack: stack.name.clone(),
        run_id: run_id.clone(),
        outcomes,
        attributes,
        outputs,
        total_duration: start.elapsed(),
    };

    events.record(ProvenanceEvent::ApplyCompleted {
        stack: stack.name.clone(),
        run_id,
        resources_provisioned: report.provisioned(),
        resources_failed: report.failed(),
        resources_skipped: report.skipped(),
        total_seconds: report.total_duration.as_secs_f64(),
    });
    tracing::info!(
        stack = %stack.name,
        provisioned = report.provisioned(),
        failed = report.failed(),
        skipped = report.skipped(),
        "apply completed"
    );

    Ok(report)
}

/// Bind every output whose references were all provisioned.
fn bind_outputs(
    outputs: &IndexMap<String, OutputDecl>,
    attributes: &IndexMap<String, Attributes>,
) -> IndexMap<String, serde_json::Value> {
    let mut bound = IndexMap::new();
    for (name, output) in outputs {
        match resolver::bind(&output.value, attributes) {
            Ok(value) => {
                bound.insert(name.clone(), value);
            }
            Err(e) => tracing::warn!(output = %name, error = %e, "output not bound"),
        }
    }
    bound
}
