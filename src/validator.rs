//! Post-build model validation
//!
//! The builders already guarantee reference integrity (a dangling or
//! wrong-kind reference fails at construction), so validation here
//! covers the semantic invariants a structurally well-formed document
//! can still violate: executable cycles, toolpath sample ordering, and
//! mesh consistency. Declared `bbox` attribute ordering is enforced at
//! parse time.

use crate::error::{Error, Result};
use crate::model::{ExecutableId, ModelStore, Project};

/// Validate a freshly built project
pub(crate) fn validate_project(project: &Project) -> Result<()> {
    validate_executable_tree(&project.store)?;
    validate_toolpaths(&project.store)?;
    validate_shell_meshes(&project.store)?;
    Ok(())
}

/// Reject cycles in the executable tree
///
/// A workplan or selective that reaches itself through its elements
/// list would make every aggregate traversal ambiguous; unlike shape
/// DAGs (which are legitimate sharing), process steps cannot contain
/// themselves.
fn validate_executable_tree(store: &ModelStore) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Unvisited,
        OnPath,
        Done,
    }

    fn visit(store: &ModelStore, id: ExecutableId, states: &mut [State]) -> Result<()> {
        match states[id.0] {
            State::Done => return Ok(()),
            State::OnPath => {
                return Err(Error::InvalidModel(format!(
                    "executable '{}' contains itself",
                    store.executable(id).base().doc_id
                )));
            }
            State::Unvisited => {}
        }
        states[id.0] = State::OnPath;
        for &child in store.executable(id).elements() {
            visit(store, child, states)?;
        }
        states[id.0] = State::Done;
        Ok(())
    }

    let mut states = vec![State::Unvisited; store.executables.len()];
    for i in 0..store.executables.len() {
        if states[i] == State::Unvisited {
            visit(store, ExecutableId(i), &mut states)?;
        }
    }
    Ok(())
}

/// Re-check the loaded-toolpath invariants
///
/// The parser enforces these for everything it loads; this pass keeps
/// them honest for data installed through other paths.
fn validate_toolpaths(store: &ModelStore) -> Result<()> {
    for toolpath in &store.toolpaths {
        let Some(data) = toolpath.data() else {
            continue;
        };
        let n = data.points.len();
        if data.axes.len() != n || data.dsamples.len() != n || data.tsamples.len() != n {
            return Err(Error::InvalidModel(format!(
                "toolpath '{}' sample arrays have mismatched lengths",
                toolpath.doc_id
            )));
        }
        for pair in data.dsamples.windows(2) {
            if pair[1] < pair[0] {
                return Err(Error::InvalidModel(format!(
                    "toolpath '{}' distance samples are not non-decreasing",
                    toolpath.doc_id
                )));
            }
        }
    }
    Ok(())
}

/// Check loaded shell meshes for internal consistency
fn validate_shell_meshes(store: &ModelStore) -> Result<()> {
    for shell in &store.shells {
        let Some(mesh) = shell.mesh() else {
            continue;
        };
        for face in &mesh.faces {
            if face.normals.len() != face.triangles.len() {
                return Err(Error::InvalidModel(format!(
                    "shell '{}' has {} facet normals for {} facets",
                    shell.doc_id,
                    face.normals.len(),
                    face.triangles.len()
                )));
            }
            for triangle in &face.triangles {
                if triangle.iter().any(|&v| v >= mesh.points.len()) {
                    return Err(Error::InvalidModel(format!(
                        "shell '{}' facet references a vertex out of bounds",
                        shell.doc_id
                    )));
                }
            }
        }
    }
    Ok(())
}
