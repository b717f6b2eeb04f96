//! Checks an implementation's shape and binds its constructor parameters.
//!
//! Analysis happens once per binding, at registration time. Every
//! parameter must already be resolvable from what is registered so far;
//! the registration order is the only dependency graph there is, which is
//! why a type can never depend on itself or on anything registered later.

use tracing::trace;

use crate::compiler::CompiledFactory;
use crate::error::{DependencyRegistrationError, QalibError, Result};
use crate::key::TypeDescriptor;
use crate::metadata::{ConstructorFn, ConstructorInfo, Disposer, TypeInfo, TypeShape, Upcast};
use crate::registry::Registry;

/// Everything needed to compile an activator for one implementation.
pub(crate) struct ConstructionPlan {
    pub(crate) implementation: TypeDescriptor,
    pub(crate) constructor: ConstructorFn,
    pub(crate) dependencies: Vec<CompiledFactory>,
    pub(crate) disposer: Option<Disposer>,
}

/// Validates the implementation's shape and returns its single constructor.
pub(crate) fn inspect(info: &TypeInfo) -> Result<&ConstructorInfo> {
    let implementation = info.descriptor();

    if info.shape() == TypeShape::Abstract {
        return Err(QalibError::NonConcreteType {
            implementation: implementation.clone(),
        });
    }

    let constructor = match info.constructors() {
        [] => {
            return Err(QalibError::NoConstructor {
                implementation: implementation.clone(),
            });
        }
        [single] => single,
        several => {
            return Err(QalibError::AmbiguousConstructors {
                implementation: implementation.clone(),
                count: several.len(),
            });
        }
    };

    for (index, param) in constructor.params().iter().enumerate() {
        if let Some(modifier) = param.modifier().describe() {
            return Err(QalibError::UnsupportedConstructorParameter {
                implementation: implementation.clone(),
                position: index + 1,
                parameter: param.descriptor().clone(),
                modifier,
            });
        }
    }

    Ok(constructor)
}

/// Checks every requested service against the implementation's contracts
/// and returns the conversion for each, in order.
pub(crate) fn check_services(info: &TypeInfo, services: &[TypeDescriptor]) -> Result<Vec<Upcast>> {
    services
        .iter()
        .map(|service| {
            if info.is_disposable_contract(service) {
                return Err(QalibError::DisposableService {
                    implementation: info.descriptor().clone(),
                    service: service.clone(),
                });
            }
            info.upcast_for(service)
                .ok_or_else(|| QalibError::ServiceNotImplemented {
                    implementation: info.descriptor().clone(),
                    service: service.clone(),
                })
        })
        .collect()
}

/// Binds every constructor parameter against `registry`.
///
/// Expects `info` to have passed [`inspect`].
pub(crate) fn plan(registry: &Registry, info: &TypeInfo, constructor: &ConstructorInfo) -> Result<ConstructionPlan> {
    let implementation = info.descriptor();

    let dependencies = constructor
        .params()
        .iter()
        .map(|param| {
            trace!(implementation = %implementation, dependency = %param.descriptor(), "Binding parameter");
            registry.plan_for(param.descriptor()).map_err(|source| {
                QalibError::DependencyRegistration(DependencyRegistrationError {
                    implementation: implementation.clone(),
                    dependency: param.descriptor().clone(),
                    source: Box::new(source),
                })
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ConstructionPlan {
        implementation: implementation.clone(),
        constructor: constructor.invoke().clone(),
        dependencies,
        disposer: info.disposer(),
    })
}
