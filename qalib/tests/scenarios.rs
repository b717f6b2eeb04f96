//! End-to-end registration and resolution scenarios.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use qalib::prelude::*;

trait Foo: Send + Sync {
    fn id(&self) -> usize;
    fn disposals(&self) -> usize;

    fn is_disposed(&self) -> bool {
        self.disposals() > 0
    }
}

trait Bar: Send + Sync {
    fn foo(&self) -> &Arc<dyn Foo>;
}

trait Consumer: Send + Sync {
    fn foo(&self) -> &Arc<dyn Foo>;
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug)]
struct FooImpl {
    id: usize,
    disposals: AtomicUsize,
}

impl FooImpl {
    fn new() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            disposals: AtomicUsize::new(0),
        }
    }
}

impl Foo for FooImpl {
    fn id(&self) -> usize {
        self.id
    }

    fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

impl Dispose for FooImpl {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BarImpl {
    foo: Arc<dyn Foo>,
}

impl Bar for BarImpl {
    fn foo(&self) -> &Arc<dyn Foo> {
        &self.foo
    }
}

struct ConsumerImpl {
    foo: Arc<dyn Foo>,
}

impl Consumer for ConsumerImpl {
    fn foo(&self) -> &Arc<dyn Foo> {
        &self.foo
    }
}

fn foo_info() -> TypeInfo {
    TypeInfo::of::<FooImpl>()
        .constructor([], |_| Ok(FooImpl::new()))
        .implements::<dyn Foo>(|this| this)
        .disposable()
        .into()
}

fn bar_info() -> TypeInfo {
    TypeInfo::of::<BarImpl>()
        .constructor([Param::of::<dyn Foo>()], |args| {
            Ok(BarImpl {
                foo: args.service::<dyn Foo>()?,
            })
        })
        .implements::<dyn Bar>(|this| this)
        .into()
}

fn consumer_info() -> TypeInfo {
    TypeInfo::of::<ConsumerImpl>()
        .constructor([Param::of::<dyn Foo>()], |args| {
            Ok(ConsumerImpl {
                foo: args.service::<dyn Foo>()?,
            })
        })
        .implements::<dyn Consumer>(|this| this)
        .into()
}

fn with_foo(lifestyle: Lifestyle) -> Container {
    Container::new(move |r| r.register_implementation(foo_info(), [TypeDescriptor::of::<dyn Foo>()], lifestyle))
        .expect("container should build")
}

#[test]
fn transient_binding_yields_distinct_instances() {
    let container = with_foo(Lifestyle::Transient);

    let first = container.resolve::<dyn Foo>().unwrap();
    let second = container.resolve::<dyn Foo>().unwrap();

    assert!(!Arc::ptr_eq(first.value(), second.value()));
    assert_ne!(first.id(), second.id());
}

#[test]
fn singleton_binding_yields_one_instance() {
    let container = with_foo(Lifestyle::Singleton);

    let first = container.resolve::<dyn Foo>().unwrap();
    let second = container.resolve::<dyn Foo>().unwrap();

    assert!(Arc::ptr_eq(first.value(), second.value()));
}

#[test]
fn dependency_registered_first_is_injected() {
    let container = Container::new(|r| {
        r.register_implementation(foo_info(), [TypeDescriptor::of::<dyn Foo>()], Lifestyle::Singleton)?;
        r.register_implementation(bar_info(), [TypeDescriptor::of::<dyn Bar>()], Lifestyle::Transient)
    })
    .unwrap();

    let bar = container.resolve::<dyn Bar>().unwrap();
    let foo = container.resolve::<dyn Foo>().unwrap();
    assert!(Arc::ptr_eq(bar.foo(), foo.value()));
}

#[test]
fn dependency_registered_later_is_rejected() {
    let result = Container::new(|r| {
        r.register_implementation(bar_info(), [TypeDescriptor::of::<dyn Bar>()], Lifestyle::Transient)?;
        r.register_implementation(foo_info(), [TypeDescriptor::of::<dyn Foo>()], Lifestyle::Singleton)
    });

    match result {
        Err(QalibError::DependencyRegistration(err)) => {
            assert_eq!(err.implementation, TypeDescriptor::of::<BarImpl>());
            assert_eq!(err.dependency, TypeDescriptor::of::<dyn Foo>());
            match *err.source {
                QalibError::NotRegisteredDependency(ref missing) => {
                    assert_eq!(missing.requested, TypeDescriptor::of::<dyn Foo>());
                }
                ref other => panic!("Expected NotRegisteredDependency, got: {other:?}"),
            }
        }
        Err(other) => panic!("Expected DependencyRegistration, got: {other:?}"),
        Ok(_) => panic!("Expected DependencyRegistration"),
    }
}

#[test]
fn disposing_a_resolution_disposes_its_transients_once() {
    let container = Container::new(|r| {
        r.register_implementation(foo_info(), [TypeDescriptor::of::<dyn Foo>()], Lifestyle::Transient)?;
        r.register_implementation(consumer_info(), [TypeDescriptor::of::<dyn Consumer>()], Lifestyle::Transient)
    })
    .unwrap();

    let consumer = container.resolve::<dyn Consumer>().unwrap();
    let foo = consumer.foo().clone();
    assert!(!foo.is_disposed());

    consumer.dispose().unwrap();
    assert!(foo.is_disposed());

    consumer.dispose().unwrap();
    assert_eq!(foo.disposals(), 1);
}

#[test]
fn registration_errors_abort_the_whole_build() {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();

    let result = Container::new(move |r| {
        let counter = counter.clone();
        r.register_implementation(
            TypeInfo::of::<FooImpl>()
                .constructor([], move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(FooImpl::new())
                })
                .implements::<dyn Foo>(|this| this),
            [TypeDescriptor::of::<dyn Foo>()],
            Lifestyle::Singleton,
        )?;
        r.register_implementation(foo_info(), [TypeDescriptor::of::<dyn Foo>()], Lifestyle::Singleton)
    });

    match result {
        Err(QalibError::AlreadyRegistered(err)) => assert_eq!(err.key, TypeDescriptor::of::<dyn Foo>()),
        Err(other) => panic!("Expected AlreadyRegistered, got: {other:?}"),
        Ok(_) => panic!("Expected AlreadyRegistered"),
    }
    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[test]
fn one_implementation_serves_several_contracts() {
    let container = Container::new(|r| {
        r.register_implementation(
            TypeInfo::of::<FooImpl>()
                .constructor([], |_| Ok(FooImpl::new()))
                .implements::<dyn Foo>(|this| this),
            [TypeDescriptor::of::<dyn Foo>(), TypeDescriptor::of::<FooImpl>()],
            Lifestyle::Singleton,
        )
    })
    .unwrap();

    let by_contract = container.resolve::<dyn Foo>().unwrap();
    let by_type = container.resolve::<FooImpl>().unwrap();
    assert_eq!(by_contract.id(), by_type.id);
}

#[test]
fn unknown_service_error_suggests_registered_ones() {
    trait FooFactory: Send + Sync {}

    let container = with_foo(Lifestyle::Transient);
    match container.resolve::<dyn FooFactory>() {
        Err(QalibError::NotRegisteredService(err)) => {
            assert_eq!(err.requested, TypeDescriptor::of::<dyn FooFactory>());
            assert_eq!(err.suggestions, vec![TypeDescriptor::of::<dyn Foo>()]);
        }
        Err(other) => panic!("Expected NotRegisteredService, got: {other:?}"),
        Ok(_) => panic!("Expected NotRegisteredService"),
    }
}
