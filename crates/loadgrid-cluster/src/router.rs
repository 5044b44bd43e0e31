//! Request routing: candidate resolution, local apply, peer fan-out.
//!
//! Fan-out is one hop by construction: every sub-request sent to a peer
//! is SELF-targeted, so a peer applies it locally and never re-routes.
//! Peer failures never fail the merged response; they become error
//! entries alongside the summaries of the instances that did respond.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use loadgrid_consume::{ConsumeError, ConsumeResult, Resource, Workflow};
use loadgrid_discovery::{Instance, PeerDiscovery};
use loadgrid_units::Unit;

use crate::client::PeerTransport;
use crate::{capture, convert, proto, resolver};

pub struct ConsumeHandler {
    workflow: Arc<Workflow>,
    discovery: Arc<dyn PeerDiscovery>,
    transport: Arc<dyn PeerTransport>,
    self_instance: Instance,
}

impl ConsumeHandler {
    pub fn new(
        workflow: Arc<Workflow>,
        discovery: Arc<dyn PeerDiscovery>,
        transport: Arc<dyn PeerTransport>,
        self_instance: Instance,
    ) -> Self {
        Self {
            workflow,
            discovery,
            transport,
            self_instance,
        }
    }

    /// Resolve the candidate set, dispatch one SELF sub-request per
    /// instance concurrently, and merge everything that came back.
    pub async fn handle(
        self: Arc<Self>,
        request: proto::ConsumeRequest,
    ) -> ConsumeResult<proto::ConsumeResponse> {
        let candidate = proto::Candidate::try_from(request.candidate).map_err(|_| {
            ConsumeError::InvalidParameter(format!(
                "unknown candidate value {}",
                request.candidate
            ))
        })?;
        let explicit = parse_explicit(&request)?;

        let peers = self.discovery.resolve_peers().await?;
        let targets = resolver::resolve(candidate, &self.self_instance, explicit.as_ref(), &peers)?;
        debug!(?candidate, targets = targets.len(), "candidates resolved");

        let mut dispatches = JoinSet::new();
        for target in targets {
            let handler = self.clone();
            let usage = request.usage.clone();
            dispatches.spawn(async move {
                let result = if target == handler.self_instance {
                    handler.apply_local(&usage).map(|summary| proto::ConsumeResponse {
                        instances: vec![summary],
                        errors: Vec::new(),
                    })
                } else {
                    let sub_request = proto::ConsumeRequest {
                        candidate: proto::Candidate::Self_ as i32,
                        usage,
                        host: String::new(),
                        port: 0,
                    };
                    handler.transport.consume(&target, sub_request).await
                };
                (target, result)
            });
        }

        let mut merged = proto::ConsumeResponse::default();
        while let Some(joined) = dispatches.join_next().await {
            let (target, result) = joined
                .map_err(|e| ConsumeError::Internal(format!("dispatch task failed: {e}")))?;
            match result {
                Ok(mut response) => {
                    merged.instances.append(&mut response.instances);
                    merged.errors.append(&mut response.errors);
                }
                Err(e) => {
                    warn!(instance = %target, error = %e, "dispatch failed");
                    merged.errors.push(capture::error_entry(&e));
                }
            }
        }
        Ok(merged)
    }

    /// Apply every usage entry against this instance's controls, then
    /// summarize all registered resources. Targets are reported in the
    /// requested unit where one was given, else the resource's default.
    fn apply_local(&self, usage: &[proto::UsageSpec]) -> ConsumeResult<proto::InstanceSummary> {
        let mut requested_units: HashMap<Resource, Unit> = HashMap::new();

        for spec in usage {
            if spec.actual != 0.0 {
                return Err(ConsumeError::InvalidParameter(
                    "usage entries must not carry an actual reading".to_string(),
                ));
            }
            let resource = convert::resource_from_proto(spec.resource)?;
            let control = self.workflow.control(resource).ok_or_else(|| {
                ConsumeError::InvalidParameter(format!(
                    "no {resource} consumer is running on this instance"
                ))
            })?;
            let unit = convert::unit_from_proto(spec.unit)?;
            control.set_target(spec.target, unit.unwrap_or_else(|| control.default_unit()))?;
            if let Some(unit) = unit {
                requested_units.insert(resource, unit);
            }
        }

        let mut summary = Vec::new();
        for control in self.workflow.controls() {
            let resource = control.resource();
            let unit = requested_units
                .get(&resource)
                .copied()
                .unwrap_or_else(|| control.default_unit());
            summary.push(proto::UsageSpec {
                resource: convert::resource_to_proto(resource) as i32,
                unit: convert::unit_to_proto(unit) as i32,
                target: control.target(unit)?,
                actual: control.actual(unit)?,
            });
        }

        Ok(proto::InstanceSummary {
            host: self.self_instance.address.clone(),
            port: self.self_instance.port as u32,
            usage: summary,
        })
    }
}

fn parse_explicit(request: &proto::ConsumeRequest) -> ConsumeResult<Option<Instance>> {
    if request.host.is_empty() && request.port == 0 {
        return Ok(None);
    }
    let port = u16::try_from(request.port).map_err(|_| {
        ConsumeError::InvalidParameter(format!("port {} is out of range", request.port))
    })?;
    Ok(Some(Instance::new(request.host.clone(), port)))
}
