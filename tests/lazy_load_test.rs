//! Deferred-load tests: queue ranking, the cost gate, chunked fetch
//! servicing, and the failure policy

use std::collections::HashMap;
use std::fmt::Write as _;

use stepnc_scene::{
    Admission, DataSource, DrawCommand, DrawOptions, Error, LoadHandle, LoadPolicy, LoadQueue,
    ObjectRef, Project, PumpStep,
};

/// In-memory data source backed by a map of href to payload
#[derive(Default)]
struct MapSource {
    payloads: HashMap<String, String>,
    fetches: Vec<String>,
}

impl MapSource {
    fn with(mut self, href: &str, payload: String) -> Self {
        self.payloads.insert(href.to_string(), payload);
        self
    }
}

impl DataSource for MapSource {
    fn fetch(&mut self, href: &str) -> stepnc_scene::Result<String> {
        self.fetches.push(href.to_string());
        self.payloads.get(href).cloned().ok_or_else(|| Error::Fetch {
            href: href.to_string(),
            reason: "no such payload".to_string(),
        })
    }
}

fn small_shell_payload(id: &str) -> String {
    format!(
        r#"<shell id="{}">
            <verts><v p="0 0 0"/><v p="1 0 0"/><v p="0 1 0"/></verts>
            <facets color="0.5 0.5 0.5"><f v="0 1 2"/></facets>
        </shell>"#,
        id
    )
}

fn large_shell_payload(id: &str, vertices: usize, facets: usize) -> String {
    let mut xml = format!("<shell id=\"{}\"><verts>", id);
    for i in 0..vertices {
        write!(xml, "<v p=\"{} 0 0\"/>", i).unwrap();
    }
    xml.push_str("</verts><facets>");
    for i in 0..facets {
        write!(
            xml,
            "<f v=\"{} {} {}\" n=\"0 0 1\"/>",
            i % vertices,
            (i + 1) % vertices,
            (i + 2) % vertices
        )
        .unwrap();
    }
    xml.push_str("</facets></shell>");
    xml
}

fn deferred_project() -> &'static str {
    // s_hot: small, voluminous, referenced twice - ranks highest.
    // s_cold: huge declared size with a small box - ranks lowest.
    r#"<project wplan="wp">
        <workplan id="wp" elements="ws1 ws2"/>
        <workingstep id="ws1" op="op1" to_be="p1"/>
        <workingstep id="ws2" op="op2" to_be="p2"/>
        <operation id="op1" toolpaths="tp"/>
        <operation id="op2" toolpaths=""/>
        <toolpath id="tp" href="tp.xml" size="2" bbox="0 0 0 5 0 0"/>
        <shape id="p1" label="P1" shells="s_hot s_cold"/>
        <shape id="p2" label="P2" shells="s_hot"/>
        <shell id="s_hot" href="hot.xml" size="10" bbox="0 0 0 10 10 10"/>
        <shell id="s_cold" href="cold.xml" size="100000" bbox="0 0 0 1 1 1"/>
    </project>"#
}

fn shell_id(project: &Project, doc_id: &str) -> stepnc_scene::ShellId {
    match project.find(doc_id) {
        Some(ObjectRef::Shell(id)) => id,
        other => panic!("'{}' should be a shell, got {:?}", doc_id, other),
    }
}

#[test]
fn test_scene_build_collects_loadables_before_loading() {
    let project = Project::from_str(deferred_project()).unwrap();
    let (_, loadables) = project.build_scene();

    // Two deferred shells (the shared one once) and one deferred toolpath
    assert_eq!(loadables.len(), 3);
    let hot = LoadHandle::Shell(shell_id(&project, "s_hot"));
    assert_eq!(loadables.iter().filter(|h| **h == hot).count(), 1);
}

#[test]
fn test_cost_gate_requires_confirmation() {
    let project = Project::from_str(deferred_project()).unwrap();
    let (_, loadables) = project.build_scene();
    let mut queue = LoadQueue::new();

    assert_eq!(project.unloaded_cost(), 100_012);
    let admission = queue.admit(
        &project.store,
        &loadables,
        LoadPolicy {
            max_cost: Some(50_000),
        },
    );
    assert_eq!(
        admission,
        Admission::ConfirmationRequired { cost: 100_012 }
    );
    // Declining is a cancel: nothing queued, nothing loaded
    assert!(queue.is_empty());
    assert_eq!(project.unloaded_cost(), 100_012);

    // Confirmed admission queues everything
    let queued = queue.admit_confirmed(&project.store, &loadables);
    assert_eq!(queued, 3);
    assert_eq!(queue.len(), 3);

    // A generous policy admits without confirmation
    let mut queue2 = LoadQueue::new();
    let admission = queue2.admit(&project.store, &loadables, LoadPolicy { max_cost: None });
    assert_eq!(admission, Admission::Queued(3));
}

#[test]
fn test_pump_services_highest_rank_first() {
    let mut project = Project::from_str(deferred_project()).unwrap();
    let (_, loadables) = project.build_scene();
    let mut queue = LoadQueue::new();
    queue.admit_confirmed(&project.store, &loadables);

    let mut source = MapSource::default()
        .with("hot.xml", small_shell_payload("s_hot"))
        .with("cold.xml", small_shell_payload("s_cold"))
        .with(
            "tp.xml",
            r#"<toolpath id="tp"><p l="0 0 0" d="0" t="0"/><p l="5 0 0" d="5" t="1"/></toolpath>"#
                .to_string(),
        );

    queue.run_to_idle(&mut project.store, &mut source).unwrap();

    // The small, voluminous, doubly referenced shell goes first; the
    // zero-volume toolpath ranks below even the huge low-volume shell
    assert_eq!(source.fetches, vec!["hot.xml", "cold.xml", "tp.xml"]);

    assert!(project.store.shell(shell_id(&project, "s_hot")).is_loaded());
    assert!(project.store.shell(shell_id(&project, "s_cold")).is_loaded());
    assert_eq!(project.unloaded_cost(), 0);
    assert!(queue.is_empty());
}

#[test]
fn test_large_deferred_shell_loads_in_chunks() {
    let xml = r#"<project wplan="wp">
        <workplan id="wp" elements="ws"/>
        <workingstep id="ws" op="op" to_be="p"/>
        <operation id="op" toolpaths=""/>
        <shape id="p" label="P" shells="big"/>
        <shell id="big" href="big.xml" size="2500" bbox="0 0 0 2500 0 0"/>
    </project>"#;
    let mut project = Project::from_str(xml).unwrap();
    let (scene, loadables) = project.build_scene();
    let mut queue = LoadQueue::new();
    queue.admit_confirmed(&project.store, &loadables);

    let mut source =
        MapSource::default().with("big.xml", large_shell_payload("big", 2500, 2500));

    // First pump fetches and starts the chunked load
    let step = queue.pump(&mut project.store, &mut source).unwrap();
    assert!(matches!(step, PumpStep::Fetched(LoadHandle::Shell(_))));

    // Drawing mid-load skips the unloaded mesh
    let list = scene.draw(&project.store, &DrawOptions::default());
    assert!(
        !list
            .commands
            .iter()
            .any(|c| matches!(c, DrawCommand::Mesh { .. }))
    );

    // 5000 items at 1000 per chunk: four in-progress pumps, then
    // completion
    let mut progressed = 0;
    loop {
        match queue.pump(&mut project.store, &mut source).unwrap() {
            PumpStep::Progress(_) => progressed += 1,
            PumpStep::Completed(_) => break,
            other => panic!("unexpected step {:?}", other),
        }
    }
    assert_eq!(progressed, 4);

    // Completed mesh draws now
    let list = scene.draw(&project.store, &DrawOptions::default());
    assert_eq!(
        list.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Mesh { .. }))
            .count(),
        1
    );
    let shell = project.store.shell(shell_id(&project, "big"));
    assert_eq!(shell.mesh().unwrap().facet_count(), 2500);
}

#[test]
fn test_failed_fetch_surfaces_and_leaves_unloaded() {
    let mut project = Project::from_str(deferred_project()).unwrap();
    let (_, loadables) = project.build_scene();
    let mut queue = LoadQueue::new();
    queue.admit_confirmed(&project.store, &loadables);
    let before = queue.len();

    // Source has no payloads at all: every pump fails its request
    let mut source = MapSource::default();
    let err = queue.pump(&mut project.store, &mut source).unwrap_err();
    assert!(matches!(err, Error::Fetch { .. }));

    // The failed request is gone, its target stays unloaded, and no
    // retry happens
    assert_eq!(queue.len(), before - 1);
    assert!(!project.store.shell(shell_id(&project, "s_hot")).is_loaded());

    while !queue.is_empty() {
        let _ = queue.pump(&mut project.store, &mut source).unwrap_err();
    }
    assert!(matches!(
        queue.pump(&mut project.store, &mut source).unwrap(),
        PumpStep::Idle
    ));
    assert_eq!(source.fetches.len(), 3);
}

#[test]
fn test_unload_and_reload() {
    let mut project = Project::from_str(deferred_project()).unwrap();
    let (scene, loadables) = project.build_scene();
    let mut queue = LoadQueue::new();
    queue.admit_confirmed(&project.store, &loadables);

    let mut source = MapSource::default()
        .with("hot.xml", small_shell_payload("s_hot"))
        .with("cold.xml", small_shell_payload("s_cold"))
        .with(
            "tp.xml",
            r#"<toolpath id="tp"><p l="0 0 0" d="0" t="0"/><p l="5 0 0" d="5" t="1"/></toolpath>"#
                .to_string(),
        );
    queue.run_to_idle(&mut project.store, &mut source).unwrap();

    // Evict one shell; its metadata survives, so it can be re-admitted
    let hot = shell_id(&project, "s_hot");
    project.store.shell_mut(hot).unload();
    assert!(!project.store.shell(hot).is_loaded());
    assert_eq!(project.unloaded_cost(), 10);

    let list = scene.draw(&project.store, &DrawOptions::default());
    let hot_draws = list
        .commands
        .iter()
        .filter(|c| matches!(c, DrawCommand::Mesh { shell, .. } if *shell == hot))
        .count();
    assert_eq!(hot_draws, 0);

    let queued = queue.admit_confirmed(&project.store, &[LoadHandle::Shell(hot)]);
    assert_eq!(queued, 1);
    queue.run_to_idle(&mut project.store, &mut source).unwrap();
    assert!(project.store.shell(hot).is_loaded());
}

#[test]
fn test_payload_id_mismatch_is_fatal() {
    let mut project = Project::from_str(deferred_project()).unwrap();
    let (_, loadables) = project.build_scene();
    let mut queue = LoadQueue::new();
    queue.admit_confirmed(&project.store, &loadables);

    let mut source = MapSource::default()
        .with("hot.xml", small_shell_payload("some_other_shell"))
        .with("cold.xml", small_shell_payload("s_cold"))
        .with(
            "tp.xml",
            r#"<toolpath id="tp"><p l="0 0 0" d="0" t="0"/></toolpath>"#.to_string(),
        );
    let err = queue
        .run_to_idle(&mut project.store, &mut source)
        .unwrap_err();
    assert!(err.to_string().contains("does not match"));
}
