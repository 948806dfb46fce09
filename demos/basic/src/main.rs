/**
 * Minimal demo of the herald event bus.
 *
 * Registers a few handlers with different masks and predicates, posts
 * and sends some events, and shows timeout blacklisting in action:
 *
 *   cargo run -p herald_demo
 *   cargo run -p herald_demo -- --slow   # watch a handler get blacklisted
 */
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use herald::{BusConfig, Event, EventBus, LocalHandlerRegistry, Properties, Value};

fn main() {
    let demo_slow_handler = std::env::args().any(|a| a == "--slow");

    let registry = Arc::new(LocalHandlerRegistry::new());

    /*
     * A subtree subscriber: sees every order event.
     */
    registry
        .register(
            vec!["demo/orders/*".to_string()],
            None,
            "audit",
            Arc::new(|event: &Event| {
                println!("[audit]     {}", event.topic());
                Ok(())
            }),
        )
        .expect("register audit handler");

    /*
     * A predicated subscriber: only large orders.
     */
    registry
        .register(
            vec!["demo/orders/*".to_string()],
            Some("(qty>=100)".to_string()),
            "bulk",
            Arc::new(|event: &Event| {
                println!("[bulk]      {} {:?}", event.topic(), event.property("qty"));
                Ok(())
            }),
        )
        .expect("register bulk handler");

    /*
     * Optionally, a handler that sleeps through its delivery budget.
     */
    if demo_slow_handler {
        registry
            .register(
                vec!["demo/orders/*".to_string()],
                None,
                "molasses",
                Arc::new(|event: &Event| {
                    println!("[molasses]  {} (sleeping...)", event.topic());
                    thread::sleep(Duration::from_secs(3));
                    Ok(())
                }),
            )
            .expect("register slow handler");
    }

    let mut config = BusConfig::default();
    config.thread_pool_size = 8;
    config.timeout_ms = 500;
    let bus = EventBus::start(registry, config);

    /*
     * Async posts from one thread arrive in posting order.
     */
    for i in 1i64..=3 {
        let mut props = Properties::new();
        props.insert("qty".into(), Value::Int(i * 60));
        let event = Event::new("demo/orders/CREATED", props).expect("event");
        bus.post_event(event).expect("post");
    }

    /*
     * A sync send blocks until every handler is done (or timed out
     * and blacklisted, with --slow).
     */
    let mut props = Properties::new();
    props.insert("qty".into(), Value::Int(500));
    bus.send_event(Event::new("demo/orders/CLOSED", props).expect("event"))
        .expect("send");
    println!("[main]      sync send completed");

    if demo_slow_handler {
        // the sleeper is blacklisted now; this one skips it entirely
        bus.send_event(Event::with_topic("demo/orders/REOPENED").expect("event"))
            .expect("send");
        println!("[main]      second send skipped the blacklisted handler");
        // let the abandoned worker finish its nap before shutdown
        thread::sleep(Duration::from_secs(3));
    }

    bus.stop();
    println!("[main]      bus stopped");
}
