use super::*;
use std::cell::{Cell, RefCell};

use crate::deps;
use crate::element::{component, host, Component};
use crate::hooks::{Cleanup, Dispatch, Transition};
use crate::host::{HostId, MemoryHost};
use crate::lane::start_transition;
use crate::scheduler::{CooperativeScheduler, ManualClock};

type TestScheduler = Rc<CooperativeScheduler<ManualClock>>;

fn mount_with(config: RootConfig) -> (Root<MemoryHost>, TestScheduler, ManualClock) {
    let clock = ManualClock::new();
    let scheduler = Rc::new(CooperativeScheduler::new(clock.clone()));
    let mut host = MemoryHost::new();
    let container: HostId = host.create_container();
    let root = Root::with_config(host, container, scheduler.clone(), config);
    (root, scheduler, clock)
}

fn mount() -> (Root<MemoryHost>, TestScheduler, ManualClock) {
    mount_with(RootConfig::default())
}

fn markup(root: &Root<MemoryHost>) -> String {
    let container = root.container();
    root.with_host(|host| host.render_to_string(container))
}

fn long_list(len: usize) -> Element {
    host("ul")
        .children(Element::list(
            (0..len).map(|n| Element::from(host("li").key(n.to_string()).child(n.to_string()))),
        ))
        .into()
}

/// A component that hands its state dispatcher to the test.
fn counter(slot: &Rc<RefCell<Option<Dispatch<i64>>>>) -> Component {
    let slot = slot.clone();
    Component::new("Counter", move |hooks, _| {
        let (count, set_count) = hooks.use_state(|| 0i64)?;
        *slot.borrow_mut() = Some(set_count);
        Ok(host("p").child(count.to_string()).into())
    })
}

#[test]
fn default_updates_wait_for_the_scheduler() {
    let (root, scheduler, _) = mount();
    root.render(host("p").child("hello"));

    assert_eq!(markup(&root), "");
    assert_eq!(root.pending_lanes(), Lanes::DEFAULT);
    assert_eq!(root.scheduled_lane(), Lanes::DEFAULT);
    assert!(root.scheduled_task().is_some());

    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<p>hello</p>");
    assert_eq!(root.pending_lanes(), Lanes::empty());
    assert_eq!(root.last_committed_lane(), Lanes::DEFAULT);
    assert_eq!(root.scheduled_task(), None);
}

#[test]
fn updates_of_one_lane_batch_into_one_commit() {
    let (root, scheduler, _) = mount();
    root.render(host("p").child("one"));
    let task = root.scheduled_task();
    root.render(host("p").child("two"));
    root.render(host("p").child("three"));
    assert_eq!(root.scheduled_task(), task);
    assert_eq!(scheduler.pending_tasks(), 1);

    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<p>three</p>");
    assert_eq!(root.commit_count(), 1);
}

#[test]
fn sync_updates_render_at_the_microtask_checkpoint() {
    let (root, scheduler, _) = mount();
    run_with_priority(Priority::Immediate, || root.render(host("p").child("now")));

    assert_eq!(root.scheduled_lane(), Lanes::SYNC);
    assert_eq!(scheduler.pending_tasks(), 0);
    assert_eq!(markup(&root), "");

    scheduler.flush_microtasks();
    assert_eq!(markup(&root), "<p>now</p>");
    assert_eq!(root.last_committed_lane(), Lanes::SYNC);
}

#[test]
fn flush_sync_renders_before_the_checkpoint() {
    let (root, scheduler, _) = mount();
    run_with_priority(Priority::Immediate, || root.render(host("p").child("now")));
    root.flush_sync();
    assert_eq!(markup(&root), "<p>now</p>");

    // The queued checkpoint finds nothing left to do.
    scheduler.flush_microtasks();
    assert_eq!(root.commit_count(), 1);
}

#[test]
fn sliced_render_yields_and_resumes_under_the_same_task() {
    let (root, scheduler, clock) = mount();
    clock.set_step_per_read(1);
    root.render(long_list(20));
    let task = root.scheduled_task();

    assert!(scheduler.run_next_task());
    assert!(root.is_render_in_progress());
    assert_eq!(root.scheduled_task(), task);
    assert_eq!(markup(&root), "");

    let slices = scheduler.run_until_idle();
    assert!(slices >= 1);
    assert!(!root.is_render_in_progress());
    assert_eq!(root.commit_count(), 1);
    let container = root.container();
    let items = root.with_host(|host| host.children(host.children(container)[0]).len());
    assert_eq!(items, 20);
}

#[test]
fn sync_update_preempts_a_sliced_transition() {
    let (root, scheduler, clock) = mount();
    clock.set_step_per_read(1);
    start_transition(|| root.render(long_list(20)));
    assert_eq!(root.scheduled_lane(), Lanes::TRANSITION);
    let transition_task = root.scheduled_task();

    scheduler.run_next_task();
    assert!(root.is_render_in_progress());

    run_with_priority(Priority::Immediate, || root.render(host("p").child("urgent")));
    assert_eq!(root.scheduled_lane(), Lanes::SYNC);
    assert_ne!(root.scheduled_task(), transition_task);
    assert_eq!(root.pending_lanes(), Lanes::SYNC | Lanes::TRANSITION);

    scheduler.flush_microtasks();
    assert_eq!(markup(&root), "<p>urgent</p>");
    assert_eq!(root.last_committed_lane(), Lanes::SYNC);
    assert_eq!(root.pending_lanes(), Lanes::TRANSITION);
    assert_eq!(root.scheduled_lane(), Lanes::TRANSITION);

    clock.set_step_per_read(0);
    scheduler.run_until_idle();
    // The transition replays in dispatch order, so the later update wins.
    assert_eq!(markup(&root), "<p>urgent</p>");
    assert_eq!(root.last_committed_lane(), Lanes::TRANSITION);
    assert_eq!(root.commit_count(), 2);
    assert_eq!(root.pending_lanes(), Lanes::empty());
}

#[test]
fn state_updates_schedule_at_the_dispatch_priority() {
    let slot = Rc::new(RefCell::new(None));
    let counter = counter(&slot);
    let (root, scheduler, _) = mount();
    root.render(component(&counter));
    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<p>0</p>");

    let set_count = slot.borrow().clone().expect("dispatcher");
    set_count.update(|n| n + 1);
    assert_eq!(root.scheduled_lane(), Lanes::DEFAULT);
    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<p>1</p>");

    run_with_priority(Priority::Immediate, || set_count.set(10));
    scheduler.flush_microtasks();
    assert_eq!(markup(&root), "<p>10</p>");
}

#[test]
fn transitions_commit_after_the_urgent_pending_flag() {
    let transition: Rc<RefCell<Option<(Transition, Dispatch<String>)>>> = Rc::default();
    let search = {
        let transition = transition.clone();
        Component::new("Search", move |hooks, _| {
            let (query, set_query) = hooks.use_state(|| "old".to_string())?;
            let (is_pending, start) = hooks.use_transition()?;
            *transition.borrow_mut() = Some((start, set_query));
            let status = if is_pending { "pending" } else { "idle" };
            Ok(host("p").child(format!("{status}:{query}")).into())
        })
    };
    let (root, scheduler, _) = mount();
    root.render(component(&search));
    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<p>idle:old</p>");

    let (start, set_query) = transition.borrow().clone().expect("transition");
    start.start(|| set_query.set("new".to_string()));
    assert_eq!(root.pending_lanes(), Lanes::DEFAULT | Lanes::TRANSITION);

    scheduler.run_next_task();
    assert_eq!(markup(&root), "<p>pending:old</p>");
    assert_eq!(root.scheduled_lane(), Lanes::TRANSITION);

    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<p>idle:new</p>");
}

#[test]
fn failed_render_is_retried_once_from_the_root() {
    let attempts = Rc::new(Cell::new(0));
    let flaky = {
        let attempts = attempts.clone();
        Component::new("Flaky", move |_, _| {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                return Err(RenderError::raised("Flaky", "not yet"));
            }
            Ok(host("p").child("ok").into())
        })
    };
    let (root, scheduler, _) = mount();
    root.render(host("div").child(component(&flaky)));
    scheduler.run_until_idle();

    assert_eq!(attempts.get(), 2);
    assert_eq!(markup(&root), "<div><p>ok</p></div>");
    assert!(root.take_errors().is_empty());
}

#[test]
fn render_that_keeps_failing_is_reported_and_dropped() {
    let broken = Component::new("Broken", |_, _| Err(RenderError::raised("Broken", "always")));
    let (root, scheduler, _) = mount();
    root.render(component(&broken));
    scheduler.run_until_idle();

    assert_eq!(markup(&root), "");
    assert_eq!(root.pending_lanes(), Lanes::empty());
    assert_eq!(
        root.take_errors(),
        vec![RootError::RenderFailed {
            lane: Lanes::DEFAULT,
            attempts: 2,
            source: RenderError::raised("Broken", "always"),
        }]
    );
    assert!(root.take_errors().is_empty());
}

#[test]
fn hook_count_mismatch_is_not_retried() {
    let first = Rc::new(Cell::new(true));
    let shifty = {
        let first = first.clone();
        Component::new("Shifty", move |hooks, _| {
            hooks.use_state(|| 0)?;
            if first.replace(false) {
                hooks.use_state(|| 0)?;
            }
            Ok(host("p").child("shifty").into())
        })
    };
    let (root, scheduler, _) = mount();
    root.render(component(&shifty));
    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<p>shifty</p>");

    root.render(component(&shifty));
    scheduler.run_until_idle();
    let errors = root.take_errors();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        RootError::RenderFailed {
            attempts, source, ..
        } => {
            assert_eq!(*attempts, 1);
            assert!(matches!(
                source,
                RenderError::HookCountMismatch {
                    component: "Shifty",
                    expected: 2,
                    found: 1
                }
            ));
        }
        other => panic!("unexpected error {other:?}"),
    }
    // The committed tree is untouched.
    assert_eq!(markup(&root), "<p>shifty</p>");
}

#[test]
fn failed_commit_is_reported_and_later_renders_recover() {
    let (root, scheduler, _) = mount();
    root.with_host_mut(|host| host.fail_next("append_to_container"));
    root.render(host("p").child("first"));
    scheduler.run_until_idle();

    assert_eq!(root.commit_count(), 0);
    assert!(matches!(
        root.take_errors().as_slice(),
        [RootError::CommitFailed { lane, .. }] if *lane == Lanes::DEFAULT
    ));
    assert_eq!(markup(&root), "");
    assert_eq!(root.with_host(|host| host.len()), 1);

    root.render(host("p").child("second"));
    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<p>second</p>");
    assert_eq!(root.commit_count(), 1);
}

#[test]
fn runaway_render_phase_updates_are_cut_off() {
    let runaway = Component::new("Runaway", |hooks, _| {
        let (count, set_count) = hooks.use_state(|| 0i64)?;
        set_count.update(|n| n + 1);
        Ok(Element::text(count))
    });
    let (root, scheduler, _) = mount_with(RootConfig {
        nested_update_limit: 3,
        ..RootConfig::default()
    });
    root.render(component(&runaway));
    scheduler.run_until_idle();

    assert_eq!(root.commit_count(), 4);
    assert_eq!(
        root.take_errors(),
        vec![RootError::UpdateDepthExceeded {
            lane: Lanes::DEFAULT,
            limit: 3,
        }]
    );
    assert!(!scheduler.has_pending_work());
}

#[test]
fn unmount_clears_the_container_and_runs_cleanups() {
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    let slot = Rc::new(RefCell::new(None));
    let widget = {
        let log = log.clone();
        let slot = slot.clone();
        Component::new("Widget", move |hooks, _| {
            let (count, set_count) = hooks.use_state(|| 0i64)?;
            *slot.borrow_mut() = Some(set_count);
            let log = log.clone();
            hooks.use_effect(Some(deps![]), move || {
                log.borrow_mut().push("mount");
                Some(Box::new(move || log.borrow_mut().push("unmount")) as Cleanup)
            })?;
            Ok(host("span").child(count.to_string()).into())
        })
    };
    let (root, scheduler, _) = mount();
    root.render(host("div").child(component(&widget)));
    scheduler.run_until_idle();
    assert_eq!(*log.borrow(), vec!["mount"]);

    root.unmount();
    scheduler.run_until_idle();
    assert_eq!(markup(&root), "");
    assert_eq!(*log.borrow(), vec!["mount", "unmount"]);
    assert_eq!(root.dump_fibers(), "Root\n");

    let set_count: Dispatch<i64> = slot.borrow().clone().expect("dispatcher");
    set_count.set(3);
    assert_eq!(root.pending_lanes(), Lanes::empty());
    assert!(!scheduler.has_pending_work());
}

#[test]
fn passive_effects_flush_before_the_next_sync_render() {
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let logger = {
        let log = log.clone();
        Component::new("Logger", move |hooks, props| {
            let label = props.str("label").unwrap_or_default().to_string();
            let log = log.clone();
            let effect_label = label.clone();
            hooks.use_effect(None, move || {
                log.borrow_mut().push(format!("effect {effect_label}"));
                None
            })?;
            Ok(Element::text(label))
        })
    };
    let (root, scheduler, _) = mount();
    run_with_priority(Priority::Immediate, || {
        root.render(component(&logger).prop("label", "a"))
    });
    scheduler.flush_microtasks();
    assert!(log.borrow().is_empty());
    assert_eq!(scheduler.pending_tasks(), 1);

    run_with_priority(Priority::Immediate, || {
        root.render(component(&logger).prop("label", "b"))
    });
    scheduler.flush_microtasks();
    assert_eq!(*log.borrow(), vec!["effect a"]);

    assert!(root.flush_passive_effects());
    assert_eq!(*log.borrow(), vec!["effect a", "effect b"]);
    assert!(!root.flush_passive_effects());
}

#[test]
fn dump_fibers_outlines_the_committed_tree() {
    let (root, scheduler, _) = mount();
    root.render(host("ul").key("list").child(host("li").child("one")));
    scheduler.run_until_idle();
    assert_eq!(
        root.dump_fibers(),
        "Root\n  ul key=\"list\"\n    li\n      \"one\"\n"
    );
    assert!(format!("{root:?}").starts_with("Root {"));
}

#[test]
fn dropping_the_root_silences_its_dispatchers() {
    let slot = Rc::new(RefCell::new(None));
    let counter = counter(&slot);
    let (root, scheduler, _) = mount();
    root.render(component(&counter));
    scheduler.run_until_idle();

    let set_count = slot.borrow().clone().expect("dispatcher");
    drop(root);
    set_count.set(1);
    assert!(!scheduler.has_pending_work());
}

#[test]
fn same_tick_dispatches_to_two_slots_commit_once() {
    let setters: Rc<RefCell<Option<(Dispatch<i64>, Dispatch<i64>)>>> = Rc::default();
    let pair = {
        let setters = setters.clone();
        Component::new("Pair", move |hooks, _| {
            let (left, set_left) = hooks.use_state(|| 0i64)?;
            let (right, set_right) = hooks.use_state(|| 0i64)?;
            *setters.borrow_mut() = Some((set_left, set_right));
            Ok(host("p").child(format!("{left},{right}")).into())
        })
    };
    let (root, scheduler, _) = mount();
    root.render(component(&pair));
    scheduler.run_until_idle();
    let commits = root.commit_count();

    let (set_left, set_right) = setters.borrow().clone().expect("setters");
    run_with_priority(Priority::Immediate, || {
        set_left.set(1);
        set_right.set(2);
    });
    scheduler.flush_microtasks();
    assert_eq!(markup(&root), "<p>1,2</p>");
    assert_eq!(root.commit_count(), commits + 1);
}

#[test]
fn failed_render_leaves_the_committed_tree_untouched() {
    let fail = Rc::new(Cell::new(false));
    let fragile = {
        let fail = fail.clone();
        Component::new("Fragile", move |_, _| {
            if fail.get() {
                return Err(RenderError::raised("Fragile", "broken"));
            }
            Ok(host("em").child("fine").into())
        })
    };
    let page = |label: &str| -> Element {
        host("section")
            .child(host("h2").child(label.to_string()))
            .child(component(&fragile))
            .into()
    };
    let (root, scheduler, _) = mount();
    root.render(page("before"));
    scheduler.run_until_idle();
    let markup_before = markup(&root);
    let fibers_before = root.dump_fibers();
    let nodes_before = root.with_host(|host| host.len());

    fail.set(true);
    root.render(page("after"));
    scheduler.run_until_idle();

    assert_eq!(root.take_errors().len(), 1);
    assert_eq!(markup(&root), markup_before);
    assert_eq!(root.dump_fibers(), fibers_before);
    // Updates reuse the committed host nodes.
    assert_eq!(root.with_host(|host| host.len()), nodes_before);
}

fn keyed_list(keys: &[&str]) -> Element {
    host("ul")
        .children(Element::list(
            keys.iter().map(|key| host("li").key(key).child(*key).into()),
        ))
        .into()
}

#[test]
fn failed_removal_restores_the_committed_host_tree() {
    let (root, scheduler, _) = mount();
    root.render(keyed_list(&["a"]));
    scheduler.run_until_idle();
    let fibers = root.dump_fibers();
    let nodes = root.with_host(|host| host.len());

    root.with_host_mut(|host| host.fail_next("remove_child"));
    root.render(keyed_list(&["b"]));
    scheduler.run_until_idle();
    assert!(matches!(
        root.take_errors().as_slice(),
        [RootError::CommitFailed { .. }]
    ));
    assert_eq!(markup(&root), "<ul><li>a</li></ul>");
    assert_eq!(root.dump_fibers(), fibers);
    assert_eq!(root.with_host(|host| host.len()), nodes);

    root.render(keyed_list(&["a"]));
    scheduler.run_until_idle();
    assert!(root.take_errors().is_empty());
    assert_eq!(markup(&root), "<ul><li>a</li></ul>");

    root.render(keyed_list(&["b"]));
    scheduler.run_until_idle();
    assert_eq!(markup(&root), "<ul><li>b</li></ul>");
    assert_eq!(root.with_host(|host| host.len()), nodes);
}

#[test]
fn failed_deletion_keeps_the_component_mounted() {
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    let slot: Rc<RefCell<Option<Dispatch<i64>>>> = Rc::default();
    let child = {
        let log = log.clone();
        let slot = slot.clone();
        Component::new("Child", move |hooks, _| {
            let (count, set_count) = hooks.use_state(|| 0i64)?;
            *slot.borrow_mut() = Some(set_count);
            let log = log.clone();
            hooks.use_effect(Some(deps![]), move || {
                log.borrow_mut().push("setup");
                Some(Box::new(move || log.borrow_mut().push("cleanup")) as Cleanup)
            })?;
            Ok(host("span").child(count.to_string()).into())
        })
    };
    let (root, scheduler, _) = mount();
    root.render(host("div").child(component(&child)));
    scheduler.run_until_idle();
    assert_eq!(*log.borrow(), vec!["setup"]);
    let fibers = root.dump_fibers();

    root.with_host_mut(|host| host.fail_next("remove_child"));
    root.render(host("div").child(host("p")));
    scheduler.run_until_idle();
    assert!(matches!(
        root.take_errors().as_slice(),
        [RootError::CommitFailed { .. }]
    ));
    assert_eq!(markup(&root), "<div><span>0</span></div>");
    assert_eq!(root.dump_fibers(), fibers);
    assert_eq!(*log.borrow(), vec!["setup"]);

    // A sync update skips the pending default-lane root update, so the
    // component re-renders in place.
    let set_count = slot.borrow().clone().expect("dispatcher");
    run_with_priority(Priority::Immediate, || set_count.set(5));
    scheduler.flush_microtasks();
    assert_eq!(markup(&root), "<div><span>5</span></div>");
    assert_eq!(*log.borrow(), vec!["setup"]);
}

#[test]
fn retried_render_releases_the_host_nodes_it_built() {
    let calls = Rc::new(Cell::new(0));
    let flaky = {
        let calls = calls.clone();
        Component::new("Flaky", move |_, _| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                return Err(RenderError::raised("Flaky", "first try"));
            }
            Ok(Element::text("ok"))
        })
    };
    let (root, scheduler, _) = mount();
    root.render(
        host("div")
            .child(host("b").child("x"))
            .child(component(&flaky)),
    );
    scheduler.run_until_idle();
    assert!(root.take_errors().is_empty());
    assert_eq!(calls.get(), 2);
    assert_eq!(markup(&root), "<div><b>x</b>ok</div>");
    // The container, div, b and the two text nodes.
    assert_eq!(root.with_host(|host| host.len()), 5);
}
