//! Topology construction.
//!
//! Applies a [`TopologyPlan`] to a [`MediaPipeline`]: create every element,
//! configure it, link the static chains, register the relay's pending legs
//! and then link the request pads. Any failure aborts the build before the
//! pipeline is started.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::TopologyMode;
use crate::error::SetupError;
use crate::pipeline::{ElementHandle, MediaPipeline};
use crate::topology::binder::{Edge, PadBinder, PendingLink};
use crate::topology::plan::{EdgeSpec, PadRef, TopologyPlan, names};

/// An assembled topology.
///
/// Dropping it releases the relay subscription; late pad notifications
/// are then ignored.
pub struct Topology {
    mode: TopologyMode,
    elements: BTreeMap<String, ElementHandle>,
    edges: Vec<Edge>,
    encoder: ElementHandle,
    binder: Option<Arc<PadBinder>>,
}

impl Topology {
    pub fn mode(&self) -> TopologyMode {
        self.mode
    }

    /// The video encoder whose bitrate the QoS loop drives.
    pub fn encoder(&self) -> &ElementHandle {
        &self.encoder
    }

    /// The session relay, in SessionRelay mode.
    pub fn relay(&self) -> Option<&ElementHandle> {
        self.binder.as_ref().map(|b| b.relay())
    }

    /// Relay legs linked since the pipeline started.
    pub fn resolved_edges(&self) -> Vec<Edge> {
        self.binder.as_ref().map(|b| b.resolved()).unwrap_or_default()
    }

    /// Prefixes of relay legs still waiting for their pad.
    pub fn pending_prefixes(&self) -> Vec<String> {
        self.binder
            .as_ref()
            .map(|b| b.pending_prefixes())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("mode", &self.mode)
            .field("elements", &self.elements.len())
            .field("edges", &self.edges.len())
            .field("pending", &self.pending_prefixes())
            .finish()
    }
}

// ── TopologyBuilder ──────────────────────────────────────────────

pub struct TopologyBuilder {
    pipeline: Arc<dyn MediaPipeline>,
}

impl TopologyBuilder {
    pub fn new(pipeline: Arc<dyn MediaPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn build(&self, plan: &TopologyPlan) -> Result<Topology, SetupError> {
        let mut elements = BTreeMap::new();

        for node in &plan.nodes {
            let handle = self
                .pipeline
                .make_element(node.factory, node.name)
                .map_err(|source| SetupError::ElementCreation {
                    factory: node.factory.to_string(),
                    name: node.name.to_string(),
                    source,
                })?;

            for (property, value) in &node.properties {
                self.pipeline
                    .set_property(&handle, property, value.clone())
                    .map_err(|source| SetupError::Property {
                        element: node.name.to_string(),
                        property: property.to_string(),
                        source,
                    })?;
            }
            debug!(element = node.name, factory = node.factory, "element created");
            elements.insert(node.name.to_string(), handle);
        }

        let lookup = |name: &str| -> Result<ElementHandle, SetupError> {
            elements
                .get(name)
                .cloned()
                .ok_or_else(|| SetupError::MissingElement(name.to_string()))
        };

        let mut edges = Vec::new();

        for chain in &plan.chains {
            for pair in chain.windows(2) {
                let src = lookup(pair[0])?;
                let sink = lookup(pair[1])?;
                self.pipeline
                    .link(&src, &sink)
                    .map_err(|source| SetupError::Link {
                        src: src.name().to_string(),
                        sink: sink.name().to_string(),
                        source,
                    })?;
                edges.push(Edge {
                    src,
                    src_pad: "src".to_string(),
                    sink,
                    sink_pad: "sink".to_string(),
                });
            }
        }

        let binder = match &plan.relay {
            Some(relay) => {
                let handle = lookup(relay.name)?;
                let legs = relay
                    .legs
                    .iter()
                    .map(|leg| {
                        Ok(PendingLink {
                            leg: leg.leg,
                            prefix: leg.prefix.to_string(),
                            sink: lookup(leg.sink)?,
                        })
                    })
                    .collect::<Result<Vec<_>, SetupError>>()?;

                let binder = PadBinder::new(Arc::clone(&self.pipeline), handle, legs);
                binder
                    .subscribe()
                    .map_err(|source| SetupError::Subscription {
                        element: relay.name.to_string(),
                        source,
                    })?;
                Some(binder)
            }
            None => None,
        };

        // The relay may add its send pads while its inputs are requested,
        // so the binder is listening before any request link is made.
        for spec in &plan.request_links {
            edges.push(self.link_request(spec, &lookup)?);
        }

        let encoder = lookup(names::ENCODER)?;

        info!(
            mode = %plan.mode,
            elements = elements.len(),
            links = edges.len(),
            "topology built"
        );

        Ok(Topology {
            mode: plan.mode,
            elements,
            edges,
            encoder,
            binder,
        })
    }

    fn link_request(
        &self,
        spec: &EdgeSpec,
        lookup: &impl Fn(&str) -> Result<ElementHandle, SetupError>,
    ) -> Result<Edge, SetupError> {
        let src = lookup(spec.src)?;
        let sink = lookup(spec.sink)?;

        let link_error = |src_pad: &str, sink_pad: &str, source| SetupError::RequestLink {
            src: spec.src.to_string(),
            src_pad: src_pad.to_string(),
            sink: spec.sink.to_string(),
            sink_pad: sink_pad.to_string(),
            source,
        };

        let template = |pad: PadRef| match pad {
            PadRef::Static(name) | PadRef::Request(name) => name,
        };

        let src_pad = self
            .resolve_pad(&src, spec.src_pad)
            .map_err(|e| link_error(template(spec.src_pad), template(spec.sink_pad), e))?;
        let sink_pad = self
            .resolve_pad(&sink, spec.sink_pad)
            .map_err(|e| link_error(&src_pad, template(spec.sink_pad), e))?;

        self.pipeline
            .link_pads(&src, &src_pad, &sink, &sink_pad)
            .map_err(|e| link_error(&src_pad, &sink_pad, e))?;

        Ok(Edge {
            src,
            src_pad,
            sink,
            sink_pad,
        })
    }

    fn resolve_pad(
        &self,
        element: &ElementHandle,
        pad: PadRef,
    ) -> Result<String, crate::error::PipelineError> {
        match pad {
            PadRef::Static(name) => Ok(name.to_string()),
            PadRef::Request(template) => self.pipeline.request_pad(element, template),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortMap, SourceKind, StreamConfig, VideoProfile};
    use crate::error::PipelineError;
    use crate::pipeline::{PipelineState, SimPipeline};
    use crate::topology::plan::{PRIMARY_LEG_PREFIX, REDUNDANCY_LEG_PREFIX};

    fn plan(mode: TopologyMode) -> TopologyPlan {
        let cfg = StreamConfig::new(
            "127.0.0.1",
            PortMap::new(5000, 5001, 5002, 5003).unwrap(),
            VideoProfile::default(),
            SourceKind::Synthetic,
            20,
            mode,
            50,
        )
        .unwrap();
        TopologyPlan::for_config(&cfg)
    }

    #[test]
    fn session_relay_builds_with_two_pending_legs() {
        let sim = Arc::new(SimPipeline::new());
        let topo = TopologyBuilder::new(sim.clone())
            .build(&plan(TopologyMode::SessionRelay))
            .unwrap();

        assert_eq!(topo.relay().map(|r| r.factory()), Some("rtpbin"));
        assert_eq!(
            topo.pending_prefixes(),
            [PRIMARY_LEG_PREFIX, REDUNDANCY_LEG_PREFIX]
        );
        assert_eq!(
            sim.element_names().iter().filter(|n| *n == "rtpbin").count(),
            1
        );
        // Output legs are not linked until the relay runs.
        let relay_out: Vec<_> = sim
            .links()
            .into_iter()
            .filter(|l| l.src == "rtpbin")
            .map(|l| l.src_pad)
            .collect();
        assert_eq!(relay_out, ["send_rtcp_src_0"]);
        assert_eq!(topo.encoder().factory(), "x264enc");
    }

    #[test]
    fn relay_legs_link_once_playing() {
        let sim = Arc::new(SimPipeline::new());
        let topo = TopologyBuilder::new(sim.clone())
            .build(&plan(TopologyMode::SessionRelay))
            .unwrap();

        sim.set_state(PipelineState::Playing).unwrap();

        assert!(topo.pending_prefixes().is_empty());
        let sinks: Vec<_> = topo
            .resolved_edges()
            .iter()
            .map(|e| e.sink.name().to_string())
            .collect();
        assert_eq!(sinks, ["udpsink_rtp", "udpsink_fec"]);
    }

    #[test]
    fn relay_pads_added_during_build_are_linked() {
        let sim = Arc::new(SimPipeline::new().with_eager_relay_pads());
        let topo = TopologyBuilder::new(sim.clone())
            .build(&plan(TopologyMode::SessionRelay))
            .unwrap();

        assert!(topo.pending_prefixes().is_empty());
        assert_eq!(topo.resolved_edges().len(), 2);

        sim.set_state(PipelineState::Playing).unwrap();
        let links = sim.links();
        for sink in ["udpsink_rtp", "udpsink_fec"] {
            assert_eq!(links.iter().filter(|l| l.sink == sink).count(), 1, "{sink}");
        }
    }

    #[test]
    fn manual_redundancy_links_everything_up_front() {
        let sim = Arc::new(SimPipeline::new());
        let topo = TopologyBuilder::new(sim.clone())
            .build(&plan(TopologyMode::ManualRedundancy))
            .unwrap();

        assert!(topo.relay().is_none());
        assert!(topo.pending_prefixes().is_empty());

        let tee_pads: Vec<_> = sim
            .links()
            .into_iter()
            .filter(|l| l.src == "tee")
            .map(|l| l.src_pad)
            .collect();
        assert_eq!(tee_pads, ["src_0", "src_1"]);
        assert!(sim.links().iter().any(|l| l.src == "fecenc" && l.sink == "udpsink_fec"));
    }

    #[test]
    fn missing_plugin_aborts_with_factory_name() {
        let sim = Arc::new(SimPipeline::new().without_factory("rtpulpfecenc"));
        let err = TopologyBuilder::new(sim.clone())
            .build(&plan(TopologyMode::ManualRedundancy))
            .unwrap_err();

        match err {
            SetupError::ElementCreation { factory, name, .. } => {
                assert_eq!(factory, "rtpulpfecenc");
                assert_eq!(name, "fecenc");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sim.state(), PipelineState::Null);
    }

    #[test]
    fn refused_link_names_both_elements() {
        let sim = Arc::new(SimPipeline::new());
        sim.refuse_link("parser", "pay");
        let err = TopologyBuilder::new(sim)
            .build(&plan(TopologyMode::SessionRelay))
            .unwrap_err();

        assert!(matches!(
            err,
            SetupError::Link { ref src, ref sink, source: PipelineError::LinkRefused { .. } }
                if src == "parser" && sink == "pay"
        ));
    }

    #[test]
    fn refused_control_leg_is_fatal() {
        let sim = Arc::new(SimPipeline::new());
        sim.refuse_link("rtpbin", "udpsink_rtcp");
        let err = TopologyBuilder::new(sim)
            .build(&plan(TopologyMode::SessionRelay))
            .unwrap_err();

        assert!(matches!(
            err,
            SetupError::RequestLink { ref src_pad, .. } if src_pad == "send_rtcp_src_0"
        ));
    }
}
