use super::*;
use std::cell::RefCell;
use std::rc::Rc;

use crate::deps;
use crate::element::{component, host, Component, Element, NodeRef};
use crate::hooks::{Cleanup, Effect};
use crate::host::{HostId, HostOp};
use crate::test_harness::Harness;

type Log = Rc<RefCell<Vec<String>>>;

fn list(keys: &[&str]) -> Element {
    host("ul")
        .children(Element::list(
            keys.iter().map(|key| host("li").key(key).child(*key).into()),
        ))
        .into()
}

fn removals(ops: &[HostOp]) -> usize {
    ops.iter()
        .filter(|op| matches!(op, HostOp::Remove { .. }))
        .count()
}

fn creations(ops: &[HostOp]) -> usize {
    ops.iter()
        .filter(|op| matches!(op, HostOp::CreateElement { .. } | HostOp::CreateText { .. }))
        .count()
}

fn ul_children(harness: &Harness) -> Vec<HostId> {
    let ul = harness.top_level()[0];
    harness.host.children(ul).to_vec()
}

#[test]
fn mount_inserts_the_tree_into_the_container() {
    let mut harness = Harness::new();
    harness.show(list(&["a", "b"]));
    assert_eq!(harness.markup(), "<ul><li>a</li><li>b</li></ul>");
    let appends: Vec<&HostOp> = harness
        .host
        .ops()
        .iter()
        .filter(|op| matches!(op, HostOp::Append { .. }))
        .collect();
    assert_eq!(appends.len(), 1);
}

#[test]
fn text_and_attribute_changes_update_in_place() {
    let mut harness = Harness::new();
    harness.show(host("p").prop("class", "old").child("1"));
    let paragraph = harness.top_level()[0];
    harness.host.take_ops();

    harness.show(host("p").prop("class", "new").child("2"));
    assert_eq!(harness.top_level(), vec![paragraph]);
    assert_eq!(harness.markup(), "<p class=\"new\">2</p>");
    let ops = harness.host.take_ops();
    assert_eq!(creations(&ops), 0);
    assert!(ops.contains(&HostOp::UpdateProps { id: paragraph }));
    assert!(ops
        .iter()
        .any(|op| matches!(op, HostOp::UpdateText { text, .. } if &**text == "2")));
}

#[test]
fn unchanged_render_commits_nothing() {
    let mut harness = Harness::new();
    harness.show(list(&["a", "b"]));
    harness.host.take_ops();
    harness.show(list(&["a", "b"]));
    assert!(harness.host.take_ops().is_empty());
}

#[test]
fn reversing_keyed_items_moves_host_nodes() {
    let mut harness = Harness::new();
    harness.show(list(&["a", "b", "c"]));
    let before = ul_children(&harness);
    harness.host.take_ops();

    harness.show(list(&["c", "b", "a"]));
    assert_eq!(harness.markup(), "<ul><li>c</li><li>b</li><li>a</li></ul>");
    let after = ul_children(&harness);
    assert_eq!(after, vec![before[2], before[1], before[0]]);

    let ops = harness.host.take_ops();
    assert_eq!(creations(&ops), 0);
    assert_eq!(removals(&ops), 0);
    assert_eq!(ops.iter().filter(|op| op.is_mutation()).count(), 2);
}

#[test]
fn insertion_goes_before_the_next_stable_sibling() {
    let mut harness = Harness::new();
    harness.show(list(&["a", "c"]));
    let before = ul_children(&harness);
    harness.host.take_ops();

    harness.show(list(&["a", "b", "c"]));
    assert_eq!(harness.markup(), "<ul><li>a</li><li>b</li><li>c</li></ul>");
    let inserted = ul_children(&harness)[1];
    assert!(harness.host.ops().contains(&HostOp::InsertBefore {
        parent: harness.top_level()[0],
        child: inserted,
        before: before[1],
    }));
}

#[test]
fn removed_items_are_deleted_once() {
    let mut harness = Harness::new();
    harness.show(list(&["a", "b", "c"]));
    harness.host.take_ops();

    harness.show(list(&["a"]));
    assert_eq!(harness.markup(), "<ul><li>a</li></ul>");
    assert_eq!(removals(&harness.host.take_ops()), 2);
}

#[test]
fn deleting_a_subtree_removes_only_its_outermost_host_nodes() {
    let mut harness = Harness::new();
    harness.show(host("div").child(list(&["a", "b", "c"])));
    let nodes_before = harness.host.len();
    harness.host.take_ops();

    harness.show(host("div"));
    assert_eq!(harness.markup(), "<div/>");
    assert_eq!(removals(&harness.host.take_ops()), 1);
    // ul, three li and three text nodes.
    assert_eq!(harness.host.len(), nodes_before - 7);
}

#[test]
fn deleted_fibers_are_released() {
    let mut harness = Harness::new();
    harness.show(list(&["a", "b"]));
    let live = harness.arena.live_slots();

    harness.set_element(list(&["a"]));
    let mut session = harness.start();
    harness.render_sync(&mut session).expect("render");
    let deleted = harness.commit(session).expect("commit");
    assert_eq!(deleted.len(), 1);
    assert!(!harness.arena.contains(deleted[0]));
    // The li and its text.
    assert_eq!(harness.arena.live_slots(), live - 2);
}

fn widget(log: &Log) -> Component {
    let log = log.clone();
    Component::new("Widget", move |hooks, _| {
        let log = log.clone();
        hooks.use_effect(Some(deps![]), move || {
            log.borrow_mut().push("mount".to_string());
            Some(Box::new(move || log.borrow_mut().push("unmount".to_string())) as Cleanup)
        })?;
        Ok(Element::list([
            Element::from(host("span").child("x")),
            Element::from(host("span").child("y")),
        ]))
    })
}

#[test]
fn deleting_a_component_unmounts_effects_once_and_removes_its_hosts() {
    let log = Log::default();
    let widget = widget(&log);
    let mut harness = Harness::new();
    harness.show(host("div").child(component(&widget).key("w")).child(host("p")));
    harness.flush_passive();
    assert_eq!(*log.borrow(), vec!["mount"]);
    assert_eq!(harness.markup(), "<div><span>x</span><span>y</span><p/></div>");
    harness.host.take_ops();

    harness.show(host("div").child(host("p")));
    assert_eq!(harness.markup(), "<div><p/></div>");
    assert_eq!(removals(&harness.host.take_ops()), 2);

    harness.flush_passive();
    harness.flush_passive();
    assert_eq!(*log.borrow(), vec!["mount", "unmount"]);
}

#[test]
fn effects_with_stable_deps_do_not_refire() {
    let log = Log::default();
    let widget = widget(&log);
    let mut harness = Harness::new();
    for _ in 0..3 {
        harness.show(component(&widget));
        harness.flush_passive();
    }
    assert_eq!(*log.borrow(), vec!["mount"]);
}

#[test]
fn refs_follow_the_mounted_node() {
    let node_ref = NodeRef::new();
    let mut harness = Harness::new();
    harness.show(host("div").child(host("input").node_ref(&node_ref)));
    let input = harness.host.children(harness.top_level()[0])[0];
    assert_eq!(node_ref.get::<HostId>(), Some(input));

    harness.show(host("div").child(host("input").node_ref(&node_ref)));
    assert_eq!(node_ref.get::<HostId>(), Some(input));

    harness.show(host("div"));
    assert!(!node_ref.is_attached());
}

#[test]
fn moving_a_ref_detaches_the_old_one() {
    let first = NodeRef::new();
    let second = NodeRef::new();
    let mut harness = Harness::new();
    harness.show(host("input").node_ref(&first));
    harness.show(host("input").node_ref(&second));
    assert!(!first.is_attached());
    assert_eq!(second.get::<HostId>(), Some(harness.top_level()[0]));
}

fn recorded_effect(log: &Log, name: &'static str, fire: bool) -> EffectRef {
    let cleanup_log = log.clone();
    let setup_log = log.clone();
    let cleanup: Cleanup = Box::new(move || cleanup_log.borrow_mut().push(format!("cleanup {name}")));
    let mut tags = HookFlags::PASSIVE;
    if fire {
        tags |= HookFlags::HAS_EFFECT;
    }
    Rc::new(RefCell::new(Effect {
        tags,
        create: Some(Box::new(move || -> Option<Cleanup> {
            setup_log.borrow_mut().push(format!("setup {name}"));
            None
        })),
        destroy: Rc::new(RefCell::new(Some(cleanup))),
        deps: None,
    }))
}

#[test]
fn passive_flush_runs_unmounts_then_cleanups_then_setups() {
    let log = Log::default();
    let gone = recorded_effect(&log, "gone", false);
    let first = recorded_effect(&log, "first", true);
    let idle = recorded_effect(&log, "idle", false);
    let second = recorded_effect(&log, "second", true);

    flush_passive_effects(PendingPassiveEffects {
        unmount: vec![gone],
        update: vec![first, idle, second],
    });
    assert_eq!(
        *log.borrow(),
        vec![
            "cleanup gone",
            "cleanup first",
            "cleanup second",
            "setup first",
            "setup second",
        ]
    );
}

#[test]
fn failed_host_mutation_is_reported() {
    let mut harness = Harness::new();
    harness.set_element(list(&["a"]));
    harness.host.fail_next("append_to_container");
    let mut session = harness.start();
    harness.render_sync(&mut session).expect("render");
    let error = harness.commit(session).unwrap_err();
    assert!(matches!(
        error,
        HostError::Operation {
            operation: "append_to_container",
            ..
        }
    ));
    assert_eq!(harness.markup(), "");
    // Only the container is left; the discarded render's nodes are gone.
    assert_eq!(harness.host.len(), 1);
}

#[test]
fn failed_removal_puts_moved_and_inserted_nodes_back() {
    let mut harness = Harness::new();
    harness.show(list(&["a", "b", "c"]));
    let before = ul_children(&harness);
    let nodes = harness.host.len();

    harness.set_element(list(&["c", "b", "x"]));
    harness.host.fail_next("remove_child");
    let mut session = harness.start();
    harness.render_sync(&mut session).expect("render");
    assert!(harness.commit(session).is_err());

    assert_eq!(harness.markup(), "<ul><li>a</li><li>b</li><li>c</li></ul>");
    assert_eq!(ul_children(&harness), before);
    assert_eq!(harness.host.len(), nodes);

    harness.show(list(&["c", "b"]));
    assert_eq!(harness.markup(), "<ul><li>c</li><li>b</li></ul>");
    assert_eq!(ul_children(&harness), vec![before[2], before[1]]);
}

#[test]
fn failed_commit_reverts_text_and_attribute_updates() {
    let mut harness = Harness::new();
    harness.show(
        host("div")
            .child(host("p").prop("class", "old").child("1"))
            .child(host("i")),
    );

    harness.set_element(host("div").child(host("p").prop("class", "new").child("2")));
    harness.host.fail_next("remove_child");
    let mut session = harness.start();
    harness.render_sync(&mut session).expect("render");
    assert!(harness.commit(session).is_err());
    assert_eq!(harness.markup(), "<div><p class=\"old\">1</p><i/></div>");
}

#[test]
fn failed_deletion_leaves_effects_and_state_alone() {
    let log = Log::default();
    let widget = widget(&log);
    let mut harness = Harness::new();
    harness.show(host("div").child(component(&widget)));
    harness.flush_passive();
    harness.host.take_ops();

    harness.set_element(host("div").child(host("p")));
    harness.host.fail_next("remove_child");
    let mut session = harness.start();
    harness.render_sync(&mut session).expect("render");
    assert!(harness.commit(session).is_err());
    assert!(harness.passive.is_empty());
    harness.flush_passive();

    assert_eq!(*log.borrow(), vec!["mount"]);
    assert_eq!(harness.markup(), "<div><span>x</span><span>y</span></div>");
    assert_eq!(
        harness.arena.dump_tree(harness.current),
        "Root\n  div\n    Widget\n      span\n        \"x\"\n      span\n        \"y\"\n"
    );
}
