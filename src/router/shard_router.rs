use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::model::{EdgeWithEndpoints, Node, NodeId, PropertyMap, PropertyValue};
use crate::router::id::ExternalId;
use crate::router::service::GraphService;

/// Keys the router plants on proxy nodes. User property maps may not use
/// the prefix, so user data can never masquerade as routing state.
const RESERVED_KEY_PREFIX: &str = "__";
const REMOTE_NODE_KEY: &str = "__remote_node";
const REMOTE_EDGE_KEY: &str = "__remote_edge";

/// A node as the fleet presents it: external id plus properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedNode {
    pub id: ExternalId,
    pub props: PropertyMap,
}

/// An edge as the fleet presents it. For a cross-shard edge the id is
/// always the from-shard half, whichever side it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedEdge {
    pub id: ExternalId,
    pub from: ExternalId,
    pub to: ExternalId,
    pub props: PropertyMap,
}

/// Maps external ids onto a static fleet of engines and composes the
/// cross-shard cases: proxy-backed edges and fanned-out traversal.
pub struct Router {
    shards: Vec<Arc<dyn GraphService>>,
    endpoints: Vec<String>,
    next_shard: AtomicUsize,
}

impl Router {
    pub fn new(shards: Vec<Arc<dyn GraphService>>) -> Result<Self> {
        let endpoints = (0..shards.len()).map(|i| format!("shard-{i}")).collect();
        Self::with_endpoints(shards, endpoints)
    }

    /// Like [`Router::new`] but naming each shard's endpoint for logs and
    /// error messages.
    pub fn with_endpoints(
        shards: Vec<Arc<dyn GraphService>>,
        endpoints: Vec<String>,
    ) -> Result<Self> {
        if shards.is_empty() {
            return Err(GraphError::InvalidArgument(
                "router needs at least one shard".into(),
            ));
        }
        if endpoints.len() != shards.len() {
            return Err(GraphError::InvalidArgument(
                "one endpoint label per shard".into(),
            ));
        }
        Ok(Self {
            shards,
            endpoints,
            next_shard: AtomicUsize::new(0),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn create_node(&self, props: PropertyMap) -> Result<ExternalId> {
        reject_reserved_keys(&props)?;
        let shard = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        let local = self.shards[shard].create_node(props)?;
        Ok(ExternalId::new(shard, local))
    }

    pub fn get_node(&self, id: &str) -> Result<RoutedNode> {
        let ext: ExternalId = id.parse()?;
        let node = self.real_node(ext)?;
        Ok(RoutedNode {
            id: ext,
            props: node.props,
        })
    }

    pub fn update_node(&self, id: &str, props: PropertyMap) -> Result<()> {
        reject_reserved_keys(&props)?;
        let ext: ExternalId = id.parse()?;
        self.real_node(ext)?;
        self.shard(ext.shard)?.update_node(ext.local, props)
    }

    /// Deletes a node and all of its edges. Incident cross-shard edges are
    /// torn down on both shards first; if any remote side cannot be
    /// removed the local delete still proceeds and the leftovers are
    /// reported as `PartiallyApplied`.
    pub fn delete_node(&self, id: &str) -> Result<()> {
        let ext: ExternalId = id.parse()?;
        let svc = self.shard(ext.shard)?;
        self.real_node(ext)?;

        let mut proxies = Vec::new();
        for edge in svc.edges_from(ext.local, None)? {
            let other = svc.get_node(edge.to)?;
            if is_proxy(&other.props) {
                proxies.push(other);
            }
        }
        for edge in svc.edges_to(ext.local, None)? {
            let other = svc.get_node(edge.from)?;
            if is_proxy(&other.props) {
                proxies.push(other);
            }
        }

        let mut failures = Vec::new();
        for proxy in proxies {
            if let Err(first) = self.teardown_cross_edge(svc, proxy.id, &proxy.props) {
                warn!(node = %ext, proxy = proxy.id, error = %first, "router.compensate");
                if let Err(second) = self.teardown_cross_edge(svc, proxy.id, &proxy.props) {
                    failures.push(second.to_string());
                }
            }
        }

        svc.delete_node(ext.local)?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GraphError::PartiallyApplied(format!(
                "node {ext} deleted but cross-shard edges remain: {}",
                failures.join("; ")
            )))
        }
    }

    /// Creates an edge. Same-shard endpoints get a plain local edge; a
    /// cross-shard pair is materialized on both shards through per-edge
    /// proxy nodes, with compensating deletes on failure.
    pub fn create_edge(&self, from: &str, props: PropertyMap, to: &str) -> Result<ExternalId> {
        reject_reserved_keys(&props)?;
        let from_ext: ExternalId = from.parse()?;
        let to_ext: ExternalId = to.parse()?;

        if from_ext.shard == to_ext.shard {
            let local =
                self.shard(from_ext.shard)?
                    .create_edge(from_ext.local, props, to_ext.local)?;
            return Ok(ExternalId::new(from_ext.shard, local));
        }

        let from_svc = self.shard(from_ext.shard)?;
        let to_svc = self.shard(to_ext.shard)?;
        self.real_node(from_ext)?;
        self.real_node(to_ext)?;

        // The destination shard gets a stand-in for the source node and
        // the mirror half of the edge.
        let source_proxy = to_svc.create_node(proxy_props(from_ext, None))?;
        let mirror = match to_svc.create_edge(source_proxy, props.clone(), to_ext.local) {
            Ok(edge) => edge,
            Err(err) => {
                let _ = to_svc.delete_node(source_proxy);
                return Err(err);
            }
        };
        let mirror_ext = ExternalId::new(to_ext.shard, mirror);

        // The source shard gets a stand-in for the destination, already
        // knowing the mirror, and then the real half.
        let dest_proxy = match from_svc.create_node(proxy_props(to_ext, Some(mirror_ext))) {
            Ok(node) => node,
            Err(err) => return Err(self.unwind(err, &[(to_ext.shard, source_proxy)])),
        };
        let local = match from_svc.create_edge(from_ext.local, props, dest_proxy) {
            Ok(edge) => edge,
            Err(err) => {
                return Err(self.unwind(
                    err,
                    &[(from_ext.shard, dest_proxy), (to_ext.shard, source_proxy)],
                ))
            }
        };
        let ext = ExternalId::new(from_ext.shard, local);

        // Backfill so the destination side can find its mirror too.
        if let Err(err) = to_svc.update_node(source_proxy, proxy_props(from_ext, Some(ext))) {
            return Err(self.unwind(
                err,
                &[(from_ext.shard, dest_proxy), (to_ext.shard, source_proxy)],
            ));
        }
        Ok(ext)
    }

    pub fn get_edge(&self, id: &str) -> Result<RoutedEdge> {
        let ext: ExternalId = id.parse()?;
        let fetched = self.shard(ext.shard)?.get_edge(ext.local, true, true)?;
        self.resolve_edge(ext, fetched)
    }

    /// Rewrites an edge's properties on every shard holding a half of it.
    pub fn update_edge(&self, id: &str, props: PropertyMap) -> Result<()> {
        reject_reserved_keys(&props)?;
        let ext: ExternalId = id.parse()?;
        let svc = self.shard(ext.shard)?;
        let fetched = svc.get_edge(ext.local, true, true)?;

        let Some(proxy) = single_proxy_endpoint(&fetched)? else {
            return svc.update_edge(ext.local, props);
        };
        svc.update_edge(ext.local, props.clone())?;
        if let Some(mirror) = mirror_of(&proxy.props)? {
            if let Err(err) = self
                .shard(mirror.shard)
                .and_then(|remote| remote.update_edge(mirror.local, props))
            {
                return Err(GraphError::PartiallyApplied(format!(
                    "edge {ext} updated locally but mirror {mirror} was not: {err}"
                )));
            }
        }
        Ok(())
    }

    /// Deletes an edge, both halves for a cross-shard one. Idempotent: once
    /// gone, a second call reports `NotFound`.
    pub fn delete_edge(&self, id: &str) -> Result<()> {
        let ext: ExternalId = id.parse()?;
        let svc = self.shard(ext.shard)?;
        let fetched = svc.get_edge(ext.local, true, true)?;

        let Some(proxy) = single_proxy_endpoint(&fetched)? else {
            return svc.delete_edge(ext.local);
        };
        match self.teardown_cross_edge(svc, proxy.id, &proxy.props) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(edge = %ext, error = %first, "router.compensate");
                self.teardown_cross_edge(svc, proxy.id, &proxy.props)
                    .map_err(|second| {
                        GraphError::PartiallyApplied(format!(
                            "cross-shard delete of edge {ext} incomplete: {second}"
                        ))
                    })
            }
        }
    }

    /// Outgoing edges of a node, cross-shard halves reconstructed.
    pub fn get_edges_from(&self, id: &str, filter: Option<&PropertyMap>) -> Result<Vec<RoutedEdge>> {
        if let Some(query) = filter {
            reject_reserved_keys(query)?;
        }
        let ext: ExternalId = id.parse()?;
        let svc = self.shard(ext.shard)?;
        self.real_node(ext)?;

        let mut out = Vec::new();
        for edge in svc.edges_from(ext.local, filter.cloned())? {
            let to_node = svc.get_node(edge.to)?;
            let local_ext = ExternalId::new(ext.shard, edge.id);
            out.push(self.resolve_edge(
                local_ext,
                EdgeWithEndpoints {
                    edge,
                    from_node: None,
                    to_node: Some(to_node),
                },
            )?);
        }
        Ok(out)
    }

    /// Incoming edges of a node, cross-shard halves reconstructed.
    pub fn get_edges_to(&self, id: &str, filter: Option<&PropertyMap>) -> Result<Vec<RoutedEdge>> {
        if let Some(query) = filter {
            reject_reserved_keys(query)?;
        }
        let ext: ExternalId = id.parse()?;
        let svc = self.shard(ext.shard)?;
        self.real_node(ext)?;

        let mut out = Vec::new();
        for edge in svc.edges_to(ext.local, filter.cloned())? {
            let from_node = svc.get_node(edge.from)?;
            let local_ext = ExternalId::new(ext.shard, edge.id);
            out.push(self.resolve_edge(
                local_ext,
                EdgeWithEndpoints {
                    edge,
                    from_node: Some(from_node),
                    to_node: None,
                },
            )?);
        }
        Ok(out)
    }

    /// Fleet-wide property scan over nodes. Proxies never surface.
    pub fn get_nodes_by_properties(&self, query: &PropertyMap) -> Result<Vec<RoutedNode>> {
        reject_reserved_keys(query)?;
        let per_shard: Vec<Vec<RoutedNode>> = self
            .shards
            .par_iter()
            .enumerate()
            .map(|(shard, svc)| {
                let nodes = svc.nodes_by_properties(query.clone())?;
                Ok(nodes
                    .into_iter()
                    .filter(|node| !is_proxy(&node.props))
                    .map(|node| RoutedNode {
                        id: ExternalId::new(shard, node.id),
                        props: node.props,
                    })
                    .collect())
            })
            .collect::<Result<_>>()?;
        Ok(per_shard.into_iter().flatten().collect())
    }

    /// Fleet-wide property scan over edges. The two halves of a
    /// cross-shard edge fold into one result under the from-side id.
    pub fn get_edges_by_properties(&self, query: &PropertyMap) -> Result<Vec<RoutedEdge>> {
        reject_reserved_keys(query)?;
        let per_shard: Vec<Vec<RoutedEdge>> = self
            .shards
            .par_iter()
            .enumerate()
            .map(|(shard, svc)| {
                let mut out = Vec::new();
                for edge in svc.edges_by_properties(query.clone())? {
                    let from_node = svc.get_node(edge.from)?;
                    let to_node = svc.get_node(edge.to)?;
                    let local_ext = ExternalId::new(shard, edge.id);
                    out.push(self.resolve_edge(
                        local_ext,
                        EdgeWithEndpoints {
                            edge,
                            from_node: Some(from_node),
                            to_node: Some(to_node),
                        },
                    )?);
                }
                Ok(out)
            })
            .collect::<Result<_>>()?;

        let mut seen = HashSet::new();
        Ok(per_shard
            .into_iter()
            .flatten()
            .filter(|edge| seen.insert(edge.id))
            .collect())
    }

    /// Bounded-depth neighbourhood search across the fleet.
    ///
    /// Fabricates one query id for the whole traversal so every engine
    /// shares a visited set, expands hop by hop with each round's frontier
    /// grouped per shard and dispatched in parallel, and follows proxies
    /// to their home shards. Proxies never appear in the results.
    pub fn find_neighbours(
        &self,
        start: &str,
        hops: u32,
        node_props: Option<&PropertyMap>,
        edge_props: Option<&PropertyMap>,
    ) -> Result<Vec<RoutedNode>> {
        if let Some(query) = node_props {
            reject_reserved_keys(query)?;
        }
        if let Some(query) = edge_props {
            reject_reserved_keys(query)?;
        }
        let start_ext: ExternalId = start.parse()?;
        self.real_node(start_ext)?;

        let query_id = fresh_query_id();
        debug!(query = %query_id, start = %start_ext, hops, "router.find_neighbours");

        let mut seen: HashSet<ExternalId> = HashSet::from([start_ext]);
        let mut results: Vec<RoutedNode> = Vec::new();
        let mut frontier = vec![start_ext];

        for _ in 0..hops {
            if frontier.is_empty() {
                break;
            }
            let mut by_shard: HashMap<usize, Vec<NodeId>> = HashMap::new();
            for ext in frontier.drain(..) {
                by_shard.entry(ext.shard).or_default().push(ext.local);
            }

            // Node predicates stay at the router: an engine cannot tell a
            // proxy from a filtered-out node, the router can.
            let batches: Vec<(usize, Vec<Node>)> = by_shard
                .into_par_iter()
                .map(|(shard, starts)| {
                    let svc = self.shard(shard)?;
                    let mut nodes = Vec::new();
                    for local in starts {
                        nodes.extend(svc.find_neighbours(
                            local,
                            1,
                            &query_id,
                            None,
                            edge_props.cloned(),
                        )?);
                    }
                    Ok((shard, nodes))
                })
                .collect::<Result<_>>()?;

            let mut next = Vec::new();
            for (shard, nodes) in batches {
                for node in nodes {
                    if is_proxy(&node.props) {
                        let target = proxy_target(&node.props)?;
                        if seen.contains(&target) {
                            continue;
                        }
                        let real = match self.shard(target.shard)?.get_node(target.local) {
                            Ok(node) => node,
                            // The remote end is gone; nothing to follow.
                            Err(GraphError::NotFound(_)) => continue,
                            Err(err) => return Err(err),
                        };
                        if node_allowed(&real.props, node_props) {
                            seen.insert(target);
                            results.push(RoutedNode {
                                id: target,
                                props: real.props,
                            });
                            next.push(target);
                        }
                    } else {
                        let ext = ExternalId::new(shard, node.id);
                        if seen.contains(&ext) {
                            continue;
                        }
                        if node_allowed(&node.props, node_props) {
                            seen.insert(ext);
                            results.push(RoutedNode {
                                id: ext,
                                props: node.props,
                            });
                            next.push(ext);
                        }
                    }
                }
            }
            frontier = next;
        }

        for svc in &self.shards {
            let _ = svc.finish_query(&query_id);
        }
        Ok(results)
    }

    fn shard(&self, index: usize) -> Result<&dyn GraphService> {
        self.shards
            .get(index)
            .map(|shard| shard.as_ref())
            .ok_or_else(|| GraphError::InvalidArgument(format!("unknown shard {index}")))
    }

    /// Fetches a node and hides proxies from the caller.
    fn real_node(&self, ext: ExternalId) -> Result<Node> {
        let node = self.shard(ext.shard)?.get_node(ext.local)?;
        if is_proxy(&node.props) {
            return Err(GraphError::NotFound("node"));
        }
        Ok(node)
    }

    /// Removes both halves of a cross-shard edge given one of its proxy
    /// endpoints: the remote proxy first (its cascade removes the mirror
    /// half), then the local one.
    fn teardown_cross_edge(
        &self,
        local: &dyn GraphService,
        local_proxy: NodeId,
        proxy_props: &PropertyMap,
    ) -> Result<()> {
        if let Some(mirror) = mirror_of(proxy_props)? {
            let remote = self.shard(mirror.shard)?;
            match remote.get_edge(mirror.local, true, true) {
                Ok(fetched) => {
                    if let Some(remote_proxy) = single_proxy_endpoint(&fetched)? {
                        remote.delete_node(remote_proxy.id)?;
                    } else {
                        remote.delete_edge(mirror.local)?;
                    }
                }
                Err(GraphError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        local.delete_node(local_proxy)
    }

    /// Best-effort rollback of a half-built cross-shard edge. Each step is
    /// a proxy node whose cascade removes its half; the original error is
    /// returned unless compensation itself fails.
    fn unwind(&self, err: GraphError, steps: &[(usize, NodeId)]) -> GraphError {
        for (shard, proxy) in steps {
            let outcome = self
                .shard(*shard)
                .and_then(|svc| svc.delete_node(*proxy));
            if let Err(comp) = outcome {
                warn!(shard, proxy, error = %comp, "router.compensate_failed");
                return GraphError::PartiallyApplied(format!(
                    "cross-shard create failed ({err}) and compensation failed ({comp})"
                ));
            }
        }
        err
    }

    /// Turns a locally-read edge into the fleet view, reconstructing the
    /// remote endpoint and canonical id from proxy properties.
    fn resolve_edge(&self, ext: ExternalId, fetched: EdgeWithEndpoints) -> Result<RoutedEdge> {
        let EdgeWithEndpoints {
            edge,
            from_node,
            to_node,
        } = fetched;
        let from_proxy = from_node.filter(|n| is_proxy(&n.props));
        let to_proxy = to_node.filter(|n| is_proxy(&n.props));

        match (from_proxy, to_proxy) {
            (None, None) => Ok(RoutedEdge {
                id: ext,
                from: ExternalId::new(ext.shard, edge.from),
                to: ExternalId::new(ext.shard, edge.to),
                props: edge.props,
            }),
            (None, Some(proxy)) => Ok(RoutedEdge {
                id: ext,
                from: ExternalId::new(ext.shard, edge.from),
                to: proxy_target(&proxy.props)?,
                props: edge.props,
            }),
            (Some(proxy), None) => Ok(RoutedEdge {
                // This is the mirror half; the canonical id lives on the
                // from shard.
                id: mirror_of(&proxy.props)?.unwrap_or(ext),
                from: proxy_target(&proxy.props)?,
                to: ExternalId::new(ext.shard, edge.to),
                props: edge.props,
            }),
            (Some(_), Some(_)) => Err(GraphError::Corruption(format!(
                "edge {ext} joins two proxy nodes"
            ))),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

fn fresh_query_id() -> String {
    format!("nq-{:016x}", rand::random::<u64>())
}

fn node_allowed(props: &PropertyMap, query: Option<&PropertyMap>) -> bool {
    query.is_none_or(|q| props.contains_all(q))
}

fn is_proxy(props: &PropertyMap) -> bool {
    props.contains_key(REMOTE_NODE_KEY)
}

fn proxy_props(target: ExternalId, mirror: Option<ExternalId>) -> PropertyMap {
    let mut props = PropertyMap::new();
    props.insert(REMOTE_NODE_KEY, PropertyValue::Text(target.to_string()));
    if let Some(mirror) = mirror {
        props.insert(REMOTE_EDGE_KEY, PropertyValue::Text(mirror.to_string()));
    }
    props
}

/// The remote node a proxy stands in for.
fn proxy_target(props: &PropertyMap) -> Result<ExternalId> {
    match props.get(REMOTE_NODE_KEY) {
        Some(PropertyValue::Text(id)) => id.parse(),
        _ => Err(GraphError::Corruption(
            "proxy node lacks its remote node id".into(),
        )),
    }
}

/// The mirror half's external id, absent while a create is mid-flight.
fn mirror_of(props: &PropertyMap) -> Result<Option<ExternalId>> {
    match props.get(REMOTE_EDGE_KEY) {
        None => Ok(None),
        Some(PropertyValue::Text(id)) => id.parse().map(Some),
        Some(_) => Err(GraphError::Corruption(
            "proxy node carries a malformed mirror id".into(),
        )),
    }
}

/// For an edge read with both endpoints inlined, the one proxy endpoint of
/// a cross-shard half, `None` for a plain local edge.
fn single_proxy_endpoint(fetched: &EdgeWithEndpoints) -> Result<Option<Node>> {
    let from_proxy = fetched
        .from_node
        .as_ref()
        .filter(|n| is_proxy(&n.props))
        .cloned();
    let to_proxy = fetched
        .to_node
        .as_ref()
        .filter(|n| is_proxy(&n.props))
        .cloned();
    match (from_proxy, to_proxy) {
        (Some(_), Some(_)) => Err(GraphError::Corruption(format!(
            "edge {} joins two proxy nodes",
            fetched.edge.id
        ))),
        (proxy, None) | (None, proxy) => Ok(proxy),
    }
}

fn reject_reserved_keys(props: &PropertyMap) -> Result<()> {
    for key in props.keys() {
        if key.starts_with(RESERVED_KEY_PREFIX) {
            return Err(GraphError::InvalidArgument(format!(
                "property key {key:?} uses the reserved {RESERVED_KEY_PREFIX} prefix"
            )));
        }
    }
    Ok(())
}
