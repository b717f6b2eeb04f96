//! Registration order, cycle rejection and concurrent use.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use qalib::prelude::*;

struct Node {
    _next: Option<Arc<Node>>,
}

struct Left;
struct Right;

fn assert_missing(result: Result<Container>, missing: TypeDescriptor) {
    match result {
        Err(err) => match err.root_cause() {
            QalibError::NotRegisteredDependency(root) => assert_eq!(root.requested, missing),
            other => panic!("Expected NotRegisteredDependency, got: {other:?}"),
        },
        Ok(_) => panic!("Expected a dependency error naming {missing}"),
    }
}

#[test]
fn self_dependency_is_rejected() {
    let result = Container::new(|r| {
        r.register_implementation(
            TypeInfo::of::<Node>().constructor([Param::of::<Node>()], |args| {
                Ok(Node {
                    _next: Some(args.service::<Node>()?),
                })
            }),
            [TypeDescriptor::of::<Node>()],
            Lifestyle::Transient,
        )
    });
    assert_missing(result, TypeDescriptor::of::<Node>());
}

#[test]
fn self_dependency_through_lazy_is_rejected() {
    let result = Container::new(|r| {
        r.register_implementation(
            TypeInfo::of::<Node>().constructor([Param::lazy::<Node>()], |args| {
                args.lazy::<Node>()?;
                Ok(Node { _next: None })
            }),
            [TypeDescriptor::of::<Node>()],
            Lifestyle::Singleton,
        )
    });
    assert_missing(result, TypeDescriptor::of::<Node>());
}

#[test]
fn self_dependency_through_factory_is_rejected() {
    let result = Container::new(|r| {
        r.register_implementation(
            TypeInfo::of::<Node>().constructor([Param::factory::<Node>()], |args| {
                args.factory::<Node>()?;
                Ok(Node { _next: None })
            }),
            [TypeDescriptor::of::<Node>()],
            Lifestyle::Transient,
        )
    });
    assert_missing(result, TypeDescriptor::of::<Node>());
}

#[test]
fn mutual_dependency_is_rejected() {
    let result = Container::new(|r| {
        r.register_implementation(
            TypeInfo::of::<Left>().constructor([Param::of::<Right>()], |_| Ok(Left)),
            [TypeDescriptor::of::<Left>()],
            Lifestyle::Transient,
        )?;
        r.register_implementation(
            TypeInfo::of::<Right>().constructor([Param::of::<Left>()], |_| Ok(Right)),
            [TypeDescriptor::of::<Right>()],
            Lifestyle::Transient,
        )
    });
    assert_missing(result, TypeDescriptor::of::<Right>());
}

#[test]
fn factory_resolving_itself_is_a_circular_resolution() {
    for lifestyle in [Lifestyle::Transient, Lifestyle::Singleton] {
        let container = Container::new(move |r| {
            r.register_factory_with(
                TypeInfo::of::<Node>(),
                [TypeDescriptor::of::<Node>()],
                lifestyle,
                |resolver| {
                    let next = resolver.resolve::<Node>()?;
                    Ok(Node { _next: Some(next) })
                },
            )?;
            r.register_implementation(
                TypeInfo::of::<Left>().constructor([], |_| Ok(Left)),
                [TypeDescriptor::of::<Left>()],
                Lifestyle::Transient,
            )
        })
        .unwrap();

        match container.resolve::<Node>() {
            Err(QalibError::CircularResolution(err)) => {
                assert_eq!(err.chain.first(), err.chain.last());
                assert_eq!(err.chain.first(), Some(&TypeDescriptor::of::<Node>()));
            }
            Err(other) => panic!("Expected CircularResolution, got: {other:?}"),
            Ok(_) => panic!("Expected CircularResolution for {lifestyle}"),
        }

        // The failure leaves the container usable.
        assert!(container.resolve::<Left>().is_ok());
    }
}

trait Source: Send + Sync {}

struct Hub {
    _source: Arc<dyn Source>,
}

struct Relay;
impl Source for Relay {}

#[test]
fn singleton_reentered_through_a_factory_is_a_circular_resolution() {
    let container = Container::new(|r| {
        r.register_factory_with(
            TypeInfo::of::<Relay>().implements::<dyn Source>(|this| this),
            [TypeDescriptor::of::<dyn Source>()],
            Lifestyle::Transient,
            |resolver| {
                resolver.resolve::<Hub>()?;
                Ok(Relay)
            },
        )?;
        r.register_implementation(
            TypeInfo::of::<Hub>().constructor([Param::of::<dyn Source>()], |args| {
                Ok(Hub {
                    _source: args.service::<dyn Source>()?,
                })
            }),
            [TypeDescriptor::of::<Hub>()],
            Lifestyle::Singleton,
        )
    })
    .unwrap();
    let container = Arc::new(container);

    // Runs on its own thread so a regression shows up as a failure, not a hang.
    let (tx, rx) = std::sync::mpsc::channel();
    let worker = {
        let container = container.clone();
        thread::spawn(move || {
            let outcome = container.resolve::<Hub>().map(|_| ());
            let _ = tx.send(outcome);
        })
    };
    let outcome = rx
        .recv_timeout(std::time::Duration::from_secs(10))
        .expect("resolving Hub should not block");
    worker.join().unwrap();

    match outcome {
        Err(QalibError::CircularResolution(err)) => assert_eq!(
            err.chain,
            vec![
                TypeDescriptor::of::<Hub>(),
                TypeDescriptor::of::<Relay>(),
                TypeDescriptor::of::<Hub>(),
            ]
        ),
        other => panic!("Expected CircularResolution, got: {other:?}"),
    }
}

#[test]
fn factory_bindings_resolve_through_their_resolver() {
    let container = Container::new(|r| {
        r.register_implementation(
            TypeInfo::of::<Left>().constructor([], |_| Ok(Left)),
            [TypeDescriptor::of::<Left>()],
            Lifestyle::Singleton,
        )?;
        r.register_factory_with(
            TypeInfo::of::<Right>(),
            [TypeDescriptor::of::<Right>()],
            Lifestyle::Transient,
            |resolver| {
                resolver.resolve::<Left>()?;
                Ok(Right)
            },
        )
    })
    .unwrap();

    assert!(container.resolve::<Right>().is_ok());
}

#[test]
fn concurrent_resolution_builds_one_singleton() {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    let container = Container::new(move |r| {
        let counter = counter.clone();
        r.register_implementation(
            TypeInfo::of::<Left>().constructor([], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::yield_now();
                Ok(Left)
            }),
            [TypeDescriptor::of::<Left>()],
            Lifestyle::Singleton,
        )
    })
    .unwrap();

    let first = container.resolve::<Left>().unwrap().into_value();
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..100 {
                    let left = container.resolve::<Left>().unwrap();
                    assert!(Arc::ptr_eq(left.value(), &first));
                }
            });
        }
    });

    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_generic_instantiation_is_compiled_once_per_key() {
    struct BoxDef;
    struct Packed {
        _inner: TypeDescriptor,
    }

    let boxed = TypeDescriptor::open_generic(TypeIdentity::named::<BoxDef>("Boxed"), 1);
    let instantiations = Arc::new(AtomicUsize::new(0));
    let counter = instantiations.clone();
    let service = boxed.clone();
    let container = Container::new(move |r| {
        let counter = counter.clone();
        let service = service.clone();
        r.register_generic(
            GenericTypeInfo::new(boxed.clone(), move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                let inner = args[0].clone();
                let closed = service.close(args.to_vec()).expect("one argument");
                Ok(TypeInfo::of::<Packed>()
                    .constructor([], move |_| Ok(Packed { _inner: inner.clone() }))
                    .implements_as::<Packed>(closed, |this| this)
                    .into())
            })
            .implements(boxed.clone(), vec![TypeArg::Parameter(0)]),
            [boxed.clone()],
        )
    })
    .unwrap();

    let boxed_left = TypeDescriptor::open_generic(TypeIdentity::named::<BoxDef>("Boxed"), 1)
        .close(vec![TypeDescriptor::of::<Left>()])
        .unwrap();
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    container.resolve_as::<Packed>(&boxed_left).unwrap();
                }
            });
        }
    });

    assert_eq!(instantiations.load(Ordering::SeqCst), 1);
}

struct Worker<const ID: usize>;

fn stage<const N: usize>(r: &Registrar) -> Result<()> {
    r.register_implementation(
        TypeInfo::of::<Worker<N>>().constructor([], |_| Ok(Worker::<N>)),
        [TypeDescriptor::of::<Worker<N>>()],
        Lifestyle::Transient,
    )
}

#[test]
fn registrations_may_be_staged_from_several_threads() {
    let container = Container::new(|r| {
        thread::scope(|s| {
            let handles = [
                s.spawn(|| stage::<0>(r)),
                s.spawn(|| stage::<1>(r)),
                s.spawn(|| stage::<2>(r)),
                s.spawn(|| stage::<3>(r)),
            ];
            handles
                .into_iter()
                .try_for_each(|handle| handle.join().expect("staging thread panicked"))
        })
    })
    .unwrap();

    assert!(container.resolve::<Worker<0>>().is_ok());
    assert!(container.resolve::<Worker<1>>().is_ok());
    assert!(container.resolve::<Worker<2>>().is_ok());
    assert!(container.resolve::<Worker<3>>().is_ok());
}

#[test]
fn disposed_container_rejects_every_request() {
    let container = Container::new(|r| {
        r.register_implementation(
            TypeInfo::of::<Left>().constructor([], |_| Ok(Left)),
            [TypeDescriptor::of::<Left>()],
            Lifestyle::Transient,
        )
    })
    .unwrap();

    container.dispose().unwrap();
    assert!(matches!(container.resolve::<Left>(), Err(QalibError::ObjectDisposed { .. })));
    assert!(matches!(container.resolve_lazy::<Left>(), Err(QalibError::ObjectDisposed { .. })));
}
