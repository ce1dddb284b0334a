//! Two scopes resolved across frames of a host loop
//!
//! The main scope promotes a message logger to the global table. The
//! hello-world scope waits for it, then binds a logger that says hello
//! whenever its observer dispatches.

use anyhow::Result;
use framewire_ioc::prelude::*;
use framewire_ioc::FrameLoop;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Minimal listener list
struct Observer<A> {
    listeners: Mutex<Vec<(usize, Listener<A>)>>,
}

impl<A> Default for Observer<A> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<A> Observer<A> {
    fn add_listener(&self, listener: impl Fn(&A) + Send + Sync + 'static) -> usize {
        let mut listeners = self.listeners.lock();
        let id = listeners.last().map_or(0, |(id, _)| id + 1);
        listeners.push((id, Arc::new(listener)));
        id
    }

    fn remove_listener(&self, id: usize) {
        self.listeners.lock().retain(|(other, _)| *other != id);
    }

    fn dispatch(&self, value: &A) {
        let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(value);
        }
    }
}

#[derive(Default)]
struct MessageObserver(Observer<String>);

impl Removable for MessageObserver {
    fn on_remove(&self) {
        self.0.listeners.lock().clear();
    }
}

impl Component for MessageObserver {
    fn capabilities() -> Capabilities<Self> {
        Capabilities::none().removable()
    }
}

impl Injectable for MessageObserver {
    fn constructors(ctors: &mut Constructors<Self>) {
        ctors.define(|()| MessageObserver::default());
    }
}

trait MessageLogger: Send + Sync {
    fn log_message(&self, message: &str);
}

struct ConsoleLogger {
    observer: Dep<MessageObserver>,
    subscription: Mutex<Option<usize>>,
}

impl MessageLogger for ConsoleLogger {
    fn log_message(&self, message: &str) {
        println!("{message}");
    }
}

impl Registrable for ConsoleLogger {
    fn on_register(&self) {
        if let Ok(observer) = self.observer.get() {
            let id = observer.0.add_listener(|message: &String| println!("{message}"));
            *self.subscription.lock() = Some(id);
        }
    }
}

impl Removable for ConsoleLogger {
    fn on_remove(&self) {
        if let (Some(id), Ok(observer)) = (self.subscription.lock().take(), self.observer.get()) {
            observer.0.remove_listener(id);
        }
    }
}

impl Component for ConsoleLogger {
    fn capabilities() -> Capabilities<Self> {
        Capabilities::none().registrable().removable()
    }
}

impl Injectable for ConsoleLogger {
    fn constructors(ctors: &mut Constructors<Self>) {
        ctors.define(|(observer,): (Dep<MessageObserver>,)| ConsoleLogger {
            observer,
            subscription: Mutex::new(None),
        });
    }
}

implements!(ConsoleLogger => dyn MessageLogger);

/// Host-owned view, only visible to its mediator
struct HudView {
    text: Mutex<String>,
}

impl Component for HudView {}

struct HudMediator {
    view: Dep<HudView>,
    observer: Dep<MessageObserver>,
    subscription: Mutex<Option<usize>>,
}

impl Registrable for HudMediator {
    fn on_register(&self) {
        let (Ok(view), Ok(observer)) = (self.view.get(), self.observer.get()) else {
            return;
        };
        *view.text.lock() = "HUD registered".to_string();
        let id = observer.0.add_listener(move |message: &String| {
            *view.text.lock() = message.clone();
        });
        *self.subscription.lock() = Some(id);
    }
}

impl Removable for HudMediator {
    fn on_remove(&self) {
        if let (Some(id), Ok(observer)) = (self.subscription.lock().take(), self.observer.get()) {
            observer.0.remove_listener(id);
        }
    }
}

impl Component for HudMediator {
    fn capabilities() -> Capabilities<Self> {
        Capabilities::none().registrable().removable()
    }
}

impl Injectable for HudMediator {
    fn constructors(ctors: &mut Constructors<Self>) {
        ctors.define(
            |(view, observer): (Dep<HudView>, Dep<MessageObserver>)| HudMediator {
                view,
                observer,
                subscription: Mutex::new(None),
            },
        );
    }
}

#[derive(Default)]
struct HelloWorldObserver(Observer<()>);

impl Component for HelloWorldObserver {}

impl Injectable for HelloWorldObserver {
    fn constructors(ctors: &mut Constructors<Self>) {
        ctors.define(|()| HelloWorldObserver::default());
    }
}

struct HelloWorldLogger {
    logger: Dep<dyn MessageLogger>,
    observer: Dep<HelloWorldObserver>,
}

impl Registrable for HelloWorldLogger {
    fn on_register(&self) {
        if let Ok(observer) = self.observer.get() {
            let logger = self.logger.clone();
            observer.0.add_listener(move |_: &()| {
                if let Ok(logger) = logger.get() {
                    logger.log_message("Hello World!");
                }
            });
        }
    }
}

impl Component for HelloWorldLogger {
    fn capabilities() -> Capabilities<Self> {
        Capabilities::none().registrable()
    }
}

impl Injectable for HelloWorldLogger {
    fn constructors(ctors: &mut Constructors<Self>) {
        ctors.define(
            |(logger, observer): (Dep<dyn MessageLogger>, Dep<HelloWorldObserver>)| {
                HelloWorldLogger { logger, observer }
            },
        );
    }
}

struct MainScope;
struct HelloWorldScope;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let global = Arc::new(GlobalScope::new());
    let mut frames = FrameLoop::new();

    let main = Container::builder()
        .token::<MainScope>()
        .global(global.clone())
        .scheduler(frames.scheduler())
        .max_slice(Duration::from_millis(4))
        .on_bind(|binder| {
            binder
                .bind_instance(HudView {
                    text: Mutex::new(String::new()),
                })?
                .to::<HudMediator>()?;
            binder.bind::<MessageObserver>()?;
            binder
                .bind_interface::<dyn MessageLogger>()
                .as_::<ConsoleLogger>()?
                .to_global_container()
        })
        .build();

    let hello = Container::builder()
        .token::<HelloWorldScope>()
        .global(global)
        .scheduler(frames.scheduler())
        .wait_for::<MainScope>()
        .on_bind(|binder| {
            binder.bind::<HelloWorldObserver>()?;
            binder.bind::<HelloWorldLogger>()?;
            Ok(())
        })
        .build();

    let hello_task = frames.spawn({
        let hello = hello.clone();
        async move { hello.resolve().await }
    })?;
    let main_task = frames.spawn({
        let main = main.clone();
        async move { main.resolve().await }
    })?;

    while hello.state() != ScopeState::Resolved {
        frames.run_frame();
        println!(
            "frame {}: main {:.0}%, hello {:.0}%",
            frames.frames_elapsed(),
            main.resolve_progress() * 100.0,
            hello.resolve_progress() * 100.0
        );
        if frames.frames_elapsed() > 100 {
            anyhow::bail!("scopes did not resolve");
        }
    }
    futures::executor::block_on(main_task)?;
    futures::executor::block_on(hello_task)?;

    main.get_dependency::<MessageObserver>()?
        .0
        .dispatch(&"Got a message from MessageObserver!".to_string());
    hello.get_dependency::<HelloWorldObserver>()?.0.dispatch(&());

    let mediator = main.get_dependency::<HudMediator>()?;
    println!("HUD shows: {}", mediator.view.get()?.text.lock());

    hello.dispose();
    main.dispose();
    Ok(())
}
