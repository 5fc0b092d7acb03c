//! Pass trait and registration points
//!
//! The host driver owns the pipeline; this crate only exposes module
//! passes and a registry mapping the driver's standard extension points
//! to pass factories. Linking is static, no dynamic loading involved.

use graymap_ir::Module;

use crate::{coverage::AflCoverage, error::PassError, split_switches::SplitSwitches};

/// A module-to-module transformation.
pub trait ModulePass {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Run over `module`, returning whether the module was mutated.
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError>;
}

/// Standard extension points a host driver invokes passes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ExtensionPoint {
    /// After the host optimization pipeline has run.
    #[strum(serialize = "optimizer-last")]
    OptimizerLast,
    /// At `-O0`, where the optimizer pipeline does not run at all.
    #[strum(serialize = "enabled-on-opt-level0")]
    EnabledOnOptLevel0,
}

type PassFactory = Box<dyn Fn() -> Result<Box<dyn ModulePass>, PassError>>;

/// Registry of pass factories keyed by extension point.
///
/// Factories run fresh for every invocation, so per-run state (random
/// sources, counters) never leaks between modules.
#[derive(Default)]
pub struct PassRegistry {
    entries: Vec<(ExtensionPoint, PassFactory)>,
}

impl PassRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass factory at an extension point.
    pub fn register<F>(&mut self, point: ExtensionPoint, factory: F)
    where
        F: Fn() -> Result<Box<dyn ModulePass>, PassError> + 'static,
    {
        self.entries.push((point, Box::new(factory)));
    }

    /// Number of factories registered at `point`.
    pub fn len_at(&self, point: ExtensionPoint) -> usize {
        self.entries.iter().filter(|(p, _)| *p == point).count()
    }

    /// Instantiate and run every pass registered at `point`, in
    /// registration order. Returns whether any pass mutated the module.
    pub fn run(
        &self,
        point: ExtensionPoint,
        module: &mut Module,
    ) -> Result<bool, PassError> {
        let mut mutated = false;
        for (p, factory) in &self.entries {
            if *p != point {
                continue;
            }
            let mut pass = factory()?;
            tracing::debug!(pass = pass.name(), point = %point, "running module pass");
            mutated |= pass.run(module)?;
        }
        Ok(mutated)
    }
}

/// Install the default pipeline, switch splitting followed by coverage
/// instrumentation, at both standard extension points.
pub fn register_default_passes(registry: &mut PassRegistry) {
    for point in [
        ExtensionPoint::OptimizerLast,
        ExtensionPoint::EnabledOnOptLevel0,
    ] {
        registry.register(point, || Ok(Box::new(SplitSwitches::new())));
        registry.register(point, || Ok(Box::new(AflCoverage::from_env()?)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_registers_at_both_points() {
        let mut registry = PassRegistry::new();
        register_default_passes(&mut registry);
        assert_eq!(registry.len_at(ExtensionPoint::OptimizerLast), 2);
        assert_eq!(registry.len_at(ExtensionPoint::EnabledOnOptLevel0), 2);
    }

    #[test]
    fn registry_runs_in_registration_order() {
        struct Recorder(&'static str, std::rc::Rc<std::cell::RefCell<Vec<&'static str>>>);
        impl ModulePass for Recorder {
            fn name(&self) -> &'static str {
                self.0
            }
            fn run(&mut self, _: &mut Module) -> Result<bool, PassError> {
                self.1.borrow_mut().push(self.0);
                Ok(false)
            }
        }

        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut registry = PassRegistry::new();
        for name in ["first", "second"] {
            let order = order.clone();
            registry.register(ExtensionPoint::OptimizerLast, move || {
                Ok(Box::new(Recorder(name, order.clone())))
            });
        }

        let mut module = Module::new("m");
        let mutated = registry
            .run(ExtensionPoint::OptimizerLast, &mut module)
            .unwrap();
        assert!(!mutated);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }
}
