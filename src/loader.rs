//! Deferred geometry loading
//!
//! Deferred shells and toolpaths are fetched through a [`DataSource`]
//! injected by the embedder and serviced by a [`LoadQueue`]; there is no
//! global loader. The queue orders requests by the rank heuristic
//! (`use_count * bounding volume / size`) and drives large mesh parses
//! through [`MeshLoadTask`], a resumable chunk task that processes a
//! bounded number of items per step so the embedder can yield between
//! chunks. A failed fetch drops its request, surfaces the error, and
//! leaves the target unloaded; nothing retries.

use std::collections::HashSet;

use nalgebra::Point3;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::geom::facet_normal;
use crate::model::{Face, ModelStore, ShellId, ShellMesh, ToolpathId};

/// Maximum vertices-plus-facets processed per [`MeshLoadTask::step`]
pub const CHUNK_BUDGET: usize = 1000;

/// One facet row as read from the document, unparsed
#[derive(Debug, Clone, PartialEq)]
pub struct FacetRow {
    /// The `v` attribute: three whitespace-separated vertex indices
    pub vertices: String,
    /// The optional `n` attribute: a normal vector
    pub normal: Option<String>,
}

/// One facet group as read from the document, unparsed
#[derive(Debug, Clone, PartialEq)]
pub struct FacetGroupData {
    /// The optional `color` attribute: three components in `[0, 1]`
    pub color: Option<String>,
    /// Facet rows in document order
    pub facets: Vec<FacetRow>,
}

/// Raw shell payload: attribute strings extracted from the document
///
/// Number parsing, the expensive part of a large mesh load, is
/// deferred to the chunk task so it can be spread across steps.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellData {
    /// Raw `p` attributes of the vertex rows
    pub verts: Vec<String>,
    /// Facet groups
    pub groups: Vec<FacetGroupData>,
}

impl ShellData {
    /// Total number of items the chunk task will process
    pub fn item_count(&self) -> usize {
        self.verts.len() + self.groups.iter().map(|g| g.facets.len()).sum::<usize>()
    }
}

/// Outcome of advancing a chunked load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    /// More chunks remain; call again on a later turn
    InProgress,
    /// The mesh is fully built
    Complete,
}

/// A resumable mesh construction task
///
/// The suspended state is nothing more than the input rows, two cursors,
/// and the partially filled buffers. Dropping the task cancels the
/// load, and a fresh task over the same data restarts it. Each `step`
/// parses at most [`CHUNK_BUDGET`] vertices and facets combined;
/// vertices are consumed before any facet, so facet index bounds are
/// always checked against the complete point list.
#[derive(Debug)]
pub struct MeshLoadTask {
    data: ShellData,
    next_vert: usize,
    group: usize,
    facet: usize,
    points: Vec<Point3<f64>>,
    faces: Vec<Face>,
}

impl MeshLoadTask {
    /// Create a task over extracted shell data
    pub fn new(data: ShellData) -> Self {
        let vert_count = data.verts.len();
        Self {
            data,
            next_vert: 0,
            group: 0,
            facet: 0,
            points: Vec::with_capacity(vert_count),
            faces: Vec::new(),
        }
    }

    /// Process one chunk
    ///
    /// Returns `Ok(Some(mesh))` when the final chunk completes,
    /// `Ok(None)` when more remain. Malformed rows are fatal: a vertex
    /// without exactly 3 coordinates, a facet without exactly 3 vertex
    /// indices, an out-of-bounds index, or any non-finite number.
    pub fn step(&mut self) -> Result<Option<ShellMesh>> {
        let mut budget = CHUNK_BUDGET;

        while budget > 0 && self.next_vert < self.data.verts.len() {
            let raw = &self.data.verts[self.next_vert];
            let [x, y, z] = parse_triple("vertex position", raw)?;
            self.points.push(Point3::new(x, y, z));
            self.next_vert += 1;
            budget -= 1;
        }

        // Facets wait until the point list is complete so index bounds
        // check against the full vertex count
        while self.next_vert == self.data.verts.len() && self.group < self.data.groups.len() {
            if self.faces.len() == self.group {
                let group = &self.data.groups[self.group];
                let color = match &group.color {
                    Some(raw) => {
                        let [r, g, b] = parse_triple("facet group color", raw)?;
                        [r as f32, g as f32, b as f32]
                    }
                    None => crate::model::DEFAULT_FACE_COLOR,
                };
                self.faces.push(Face::new(color));
            }
            let group_data = &self.data.groups[self.group];
            if self.facet >= group_data.facets.len() {
                // Closing out an exhausted group costs no budget
                self.group += 1;
                self.facet = 0;
                continue;
            }
            if budget == 0 {
                break;
            }
            let row = &group_data.facets[self.facet];
            let indices = parse_facet_indices(&row.vertices, self.points.len())?;
            let normal = match &row.normal {
                Some(raw) => {
                    let [nx, ny, nz] = parse_triple("facet normal", raw)?;
                    let n = nalgebra::Vector3::new(nx, ny, nz);
                    let len = n.norm();
                    if len > 0.0 {
                        n / len
                    } else {
                        self.winding_normal(&indices)
                    }
                }
                None => self.winding_normal(&indices),
            };
            let face = &mut self.faces[self.group];
            face.triangles.push(indices);
            face.normals.push(normal);
            self.facet += 1;
            budget -= 1;
        }

        if self.next_vert == self.data.verts.len() && self.group == self.data.groups.len() {
            return Ok(Some(ShellMesh {
                points: std::mem::take(&mut self.points),
                faces: std::mem::take(&mut self.faces),
            }));
        }
        Ok(None)
    }

    fn winding_normal(&self, indices: &[usize; 3]) -> nalgebra::Vector3<f64> {
        facet_normal(
            &self.points[indices[0]],
            &self.points[indices[1]],
            &self.points[indices[2]],
        )
    }
}

fn parse_triple(field: &str, raw: &str) -> Result<[f64; 3]> {
    let mut out = [0.0; 3];
    let mut count = 0;
    for part in raw.split_whitespace() {
        if count == 3 {
            count += 1;
            break;
        }
        let value: f64 = part
            .parse()
            .map_err(|_| Error::parse_error_with_context(field, part, "finite number"))?;
        if !value.is_finite() {
            return Err(Error::parse_error_with_context(field, part, "finite number"));
        }
        out[count] = value;
        count += 1;
    }
    if count != 3 {
        return Err(Error::ParseError(format!(
            "'{}' must have exactly 3 components (got '{}')",
            field, raw
        )));
    }
    Ok(out)
}

fn parse_facet_indices(raw: &str, vertex_count: usize) -> Result<[usize; 3]> {
    let mut out = [0usize; 3];
    let mut count = 0;
    for part in raw.split_whitespace() {
        if count == 3 {
            count += 1;
            break;
        }
        let index: usize = part
            .parse()
            .map_err(|_| Error::parse_error_with_context("facet vertex index", part, "integer"))?;
        if index >= vertex_count {
            return Err(Error::InvalidModel(format!(
                "facet vertex index {} out of bounds ({} vertices)",
                index, vertex_count
            )));
        }
        out[count] = index;
        count += 1;
    }
    if count != 3 {
        return Err(Error::InvalidModel(format!(
            "facet must reference exactly 3 vertices (got '{}')",
            raw
        )));
    }
    Ok(out)
}

/// A deferred-loadable model object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadHandle {
    /// A deferred shell
    Shell(ShellId),
    /// A deferred toolpath
    Toolpath(ToolpathId),
}

/// Provider of deferred data documents
///
/// Implemented by the embedder over whatever transport serves the
/// project's `href` targets: files, HTTP, an archive. The returned
/// string is the payload document for the requested target.
pub trait DataSource {
    /// Fetch the payload document behind `href`
    fn fetch(&mut self, href: &str) -> Result<String>;
}

/// Admission policy for bulk loads
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadPolicy {
    /// Estimated-cost threshold above which admission requires
    /// confirmation; `None` admits everything
    pub max_cost: Option<u64>,
}

/// Outcome of [`LoadQueue::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Requests were enqueued
    Queued(usize),
    /// The estimated cost exceeds the policy threshold; nothing was
    /// enqueued. Re-admit with [`LoadQueue::admit_confirmed`] to
    /// proceed, or drop the handles to cancel; cancelling changes no
    /// state.
    ConfirmationRequired {
        /// The estimated facet/sample cost of the batch
        cost: u64,
    },
}

/// Outcome of one [`LoadQueue::pump`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStep {
    /// Nothing pending
    Idle,
    /// A payload was fetched and its chunked load began
    Fetched(LoadHandle),
    /// An in-flight chunked load advanced by one chunk
    Progress(LoadHandle),
    /// A target finished loading
    Completed(LoadHandle),
}

/// Rank-ordered queue of deferred load requests
///
/// One fetch or one chunk per `pump` call; the embedder decides how
/// often to pump. Draw traversals are safe to interleave with pumping;
/// unloaded geometry is simply skipped until its load completes.
#[derive(Debug, Default)]
pub struct LoadQueue {
    pending: Vec<LoadHandle>,
    active: Option<ShellId>,
}

impl LoadQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending requests, counting an in-flight chunked load
    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.active.is_some())
    }

    /// True when nothing is pending or in flight
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.active.is_none()
    }

    /// Admit a batch of handles under a cost policy
    ///
    /// Computes the batch's estimated cost first; if it exceeds the
    /// policy threshold, nothing is enqueued and the caller gets the
    /// cost back to present for confirmation.
    pub fn admit(
        &mut self,
        store: &ModelStore,
        handles: &[LoadHandle],
        policy: LoadPolicy,
    ) -> Admission {
        let unique: HashSet<LoadHandle> = handles.iter().copied().collect();
        let cost: u64 = unique
            .iter()
            .map(|h| match h {
                LoadHandle::Shell(id) => store.shell(*id).unloaded_cost(),
                LoadHandle::Toolpath(id) => store.toolpath(*id).unloaded_cost(),
            })
            .sum();
        if let Some(max_cost) = policy.max_cost {
            if cost > max_cost {
                return Admission::ConfirmationRequired { cost };
            }
        }
        Admission::Queued(self.enqueue(store, handles))
    }

    /// Admit a batch the user has already confirmed, bypassing the gate
    pub fn admit_confirmed(&mut self, store: &ModelStore, handles: &[LoadHandle]) -> usize {
        self.enqueue(store, handles)
    }

    fn enqueue(&mut self, store: &ModelStore, handles: &[LoadHandle]) -> usize {
        let mut queued = 0;
        for &handle in handles {
            if self.pending.contains(&handle) {
                continue;
            }
            let loadable = match handle {
                LoadHandle::Shell(id) => {
                    let shell = store.shell(id);
                    !shell.is_loaded() && shell.href.is_some() && self.active != Some(id)
                }
                LoadHandle::Toolpath(id) => {
                    let tp = store.toolpath(id);
                    !tp.is_loaded() && tp.href.is_some()
                }
            };
            if loadable {
                self.pending.push(handle);
                queued += 1;
            }
        }
        queued
    }

    /// Service the queue by one unit of work
    ///
    /// An in-flight chunked shell load advances by one chunk before any
    /// new fetch starts. Otherwise the best-ranked pending request is
    /// fetched and begun. A fetch or parse failure removes the request
    /// and surfaces the error; the target stays unloaded.
    pub fn pump(&mut self, store: &mut ModelStore, source: &mut dyn DataSource) -> Result<PumpStep> {
        if let Some(shell_id) = self.active {
            let shell = store.shell_mut(shell_id);
            match shell.step_load() {
                Ok(LoadStep::Complete) => {
                    self.active = None;
                    debug!(shell = %shell.doc_id, "deferred shell load complete");
                    return Ok(PumpStep::Completed(LoadHandle::Shell(shell_id)));
                }
                Ok(LoadStep::InProgress) => {
                    return Ok(PumpStep::Progress(LoadHandle::Shell(shell_id)));
                }
                Err(e) => {
                    self.active = None;
                    return Err(e);
                }
            }
        }

        let Some(best) = self.take_best(store) else {
            return Ok(PumpStep::Idle);
        };

        match best {
            LoadHandle::Shell(id) => {
                let href = match &store.shell(id).href {
                    Some(href) => href.clone(),
                    None => {
                        return Err(Error::InvalidModel(format!(
                            "shell '{}' has no href to fetch",
                            store.shell(id).doc_id
                        )));
                    }
                };
                let payload = source.fetch(&href).map_err(|e| {
                    warn!(href = %href, "deferred shell fetch failed");
                    wrap_fetch_error(&href, e)
                })?;
                let data = crate::parser::parse_shell_payload(&payload, &store.shell(id).doc_id)?;
                store.shell_mut(id).begin_load(data)?;
                self.active = Some(id);
                Ok(PumpStep::Fetched(best))
            }
            LoadHandle::Toolpath(id) => {
                let href = match &store.toolpath(id).href {
                    Some(href) => href.clone(),
                    None => {
                        return Err(Error::InvalidModel(format!(
                            "toolpath '{}' has no href to fetch",
                            store.toolpath(id).doc_id
                        )));
                    }
                };
                let payload = source.fetch(&href).map_err(|e| {
                    warn!(href = %href, "deferred toolpath fetch failed");
                    wrap_fetch_error(&href, e)
                })?;
                let data =
                    crate::parser::parse_toolpath_payload(&payload, &store.toolpath(id).doc_id)?;
                store.toolpath_mut(id).load(data);
                Ok(PumpStep::Completed(best))
            }
        }
    }

    /// Drive the queue until idle
    ///
    /// Convenience for batch consumers and tests; interactive embedders
    /// call `pump` once per turn instead.
    pub fn run_to_idle(
        &mut self,
        store: &mut ModelStore,
        source: &mut dyn DataSource,
    ) -> Result<()> {
        loop {
            if matches!(self.pump(store, source)?, PumpStep::Idle) {
                return Ok(());
            }
        }
    }

    fn take_best(&mut self, store: &ModelStore) -> Option<LoadHandle> {
        if self.pending.is_empty() {
            return None;
        }
        let mut best = 0;
        let mut best_rank = f64::NEG_INFINITY;
        for (i, handle) in self.pending.iter().enumerate() {
            let rank = match handle {
                LoadHandle::Shell(id) => store.shell(*id).rank(),
                LoadHandle::Toolpath(id) => store.toolpath(*id).rank(),
            };
            if rank > best_rank {
                best_rank = rank;
                best = i;
            }
        }
        Some(self.pending.remove(best))
    }
}

fn wrap_fetch_error(href: &str, err: Error) -> Error {
    match err {
        already @ Error::Fetch { .. } => already,
        other => Error::Fetch {
            href: href.to_string(),
            reason: other.to_string(),
        },
    }
}
