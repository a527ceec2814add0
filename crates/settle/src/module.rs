//! Test module configuration and compilation.
//!
//! A [`ModuleConfig`] collects declarations, providers and overrides. It
//! compiles once per test into a [`CompiledModule`]: the component
//! registry plus a root injector that also provides the harness built-ins
//! (platform scheduler, clock, document, diagnostics).

use crate::clock::{create_clock, Clock};
use crate::logging::Diagnostics;
use crate::result::{SettleError, SettleResult};
use crate::scheduler::Scheduler;
use crate::view::component::{Component, ComponentDef};
use crate::view::dom::Document;
use crate::view::injector::{Injector, Provider};
use crate::view::ViewEnv;
use crate::zone::FakeAsyncZone;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Error logged when a test module uses real browser animations
pub const BAD_ANIMATION_MODULE_MSG: &str = "The NoopAnimationsModule should be used in your tests to allow the testing framework to ensure the synchronicity of the test environment. Continuing to use BrowserAnimationsModule can cause unexpected issues in your tests because web animations synchronicity cannot be guaranteed.";

/// Animation module types that break synchronous tests
pub const BAD_ANIMATION_MODULES: [&str; 1] = ["BrowserAnimations"];

/// Unknown-element handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Schema {
    /// Allow any tag containing `-`
    CustomElements,
    /// Allow any tag
    NoErrors,
}

/// What happens to the fixture when a test ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleTeardownOptions {
    /// Failures of `on_destroy` during reset fail the test
    pub destroy_after_each: bool,
    /// With `destroy_after_each`, return teardown errors instead of logging
    pub rethrow_errors: bool,
}

impl Default for ModuleTeardownOptions {
    fn default() -> Self {
        Self {
            destroy_after_each: false,
            rethrow_errors: true,
        }
    }
}

/// Animation implementation provided by an imported module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationModuleType(pub String);

/// Named bundle of declarations and providers
#[derive(Debug, Clone, Default)]
pub struct TestModuleDef {
    name: String,
    declarations: Vec<ComponentDef>,
    providers: Vec<Provider>,
    imports: Vec<TestModuleDef>,
}

impl TestModuleDef {
    /// Empty module
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a component
    #[must_use]
    pub fn declare<C: Component>(mut self) -> Self {
        self.declarations.push(ComponentDef::of::<C>());
        self
    }

    /// Add a provider
    #[must_use]
    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Import another module
    #[must_use]
    pub fn import(mut self, module: TestModuleDef) -> Self {
        self.imports.push(module);
        self
    }

    fn flatten_into(&self, declarations: &mut Vec<ComponentDef>, providers: &mut Vec<Provider>) {
        for import in &self.imports {
            import.flatten_into(declarations, providers);
        }
        declarations.extend(self.declarations.iter().cloned());
        providers.extend(self.providers.iter().cloned());
    }
}

/// Animations replaced by synchronous no-ops
#[must_use]
pub fn noop_animations_module() -> TestModuleDef {
    TestModuleDef::new("NoopAnimationsModule")
        .provider(Provider::value(AnimationModuleType("NoopAnimations".to_string())))
}

/// Real browser animations; logs an error when bootstrapped
#[must_use]
pub fn browser_animations_module() -> TestModuleDef {
    TestModuleDef::new("BrowserAnimationsModule")
        .provider(Provider::value(AnimationModuleType("BrowserAnimations".to_string())))
}

/// Test module configuration
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    imports: Vec<TestModuleDef>,
    declarations: Vec<ComponentDef>,
    providers: Vec<Provider>,
    super_providers: Vec<Provider>,
    template_overrides: HashMap<TypeId, String>,
    schemas: Vec<Schema>,
    teardown: ModuleTeardownOptions,
}

impl ModuleConfig {
    /// Empty configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a module bundle
    #[must_use]
    pub fn imports(mut self, module: TestModuleDef) -> Self {
        self.imports.push(module);
        self
    }

    /// Declare a component
    #[must_use]
    pub fn declare<C: Component>(mut self) -> Self {
        self.declarations.push(ComponentDef::of::<C>());
        self
    }

    /// Add a module-level provider
    #[must_use]
    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Add a provider that overrides module and component providers alike
    #[must_use]
    pub fn super_provider(mut self, provider: Provider) -> Self {
        self.super_providers.push(provider);
        self
    }

    /// Replace the template of `C`
    #[must_use]
    pub fn template_override<C: Component>(mut self, template: impl Into<String>) -> Self {
        self.template_overrides.insert(TypeId::of::<C>(), template.into());
        self
    }

    /// Relax unknown-element checking
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Fixture teardown behavior
    #[must_use]
    pub const fn teardown(mut self, teardown: ModuleTeardownOptions) -> Self {
        self.teardown = teardown;
        self
    }

    /// Teardown options
    #[must_use]
    pub const fn teardown_options(&self) -> ModuleTeardownOptions {
        self.teardown
    }

    /// Compile into a registry and root injector
    ///
    /// # Errors
    ///
    /// Returns `Component` if two declared components share a selector
    pub fn compile(&self, env: ModuleEnv) -> SettleResult<CompiledModule> {
        let mut declarations = Vec::new();
        let mut module_providers = Vec::new();
        for import in &self.imports {
            import.flatten_into(&mut declarations, &mut module_providers);
        }
        declarations.extend(self.declarations.iter().cloned());
        module_providers.extend(self.providers.iter().cloned());

        let mut registry = Registry {
            overrides: self.template_overrides.clone(),
            ..Registry::default()
        };
        for def in declarations {
            registry.insert(def)?;
        }

        let mut providers = vec![
            Provider::value(Rc::clone(&env.scheduler)),
            Provider::value(env.clock.clone()),
            Provider::value(env.document.clone()),
            Provider::value(env.diagnostics.clone()),
        ];
        providers.extend(module_providers);
        let injector = Injector::root(providers, self.super_providers.clone());

        let registry = Rc::new(registry);
        tracing::debug!(
            components = registry.len(),
            imports = self.imports.len(),
            "test module compiled"
        );
        Ok(CompiledModule {
            env: Rc::new(ViewEnv {
                document: env.document,
                registry: Rc::clone(&registry),
                schemas: self.schemas.clone(),
                diagnostics: env.diagnostics,
                scheduler: env.scheduler,
            }),
            registry,
            injector,
            teardown: self.teardown,
        })
    }
}

/// Harness services a module is compiled against
#[derive(Clone)]
pub struct ModuleEnv {
    /// Document views render into
    pub document: Document,
    /// Scheduler handed to components
    pub scheduler: Rc<dyn Scheduler>,
    /// Virtual clock
    pub clock: Clock,
    /// Diagnostics log
    pub diagnostics: Diagnostics,
}

impl fmt::Debug for ModuleEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEnv")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl ModuleEnv {
    /// Fresh document and clock wired to `zone`
    #[must_use]
    pub fn for_zone(zone: &FakeAsyncZone, diagnostics: Diagnostics) -> Self {
        let document = Document::new();
        document.set_invoker(Some(Rc::new(zone.clone())));
        Self {
            document,
            scheduler: Rc::new(zone.platform()),
            clock: create_clock(),
            diagnostics,
        }
    }
}

/// Component declarations by selector and by type
#[derive(Debug, Default)]
pub struct Registry {
    by_selector: HashMap<String, ComponentDef>,
    by_type: HashMap<TypeId, ComponentDef>,
    overrides: HashMap<TypeId, String>,
}

impl Registry {
    fn insert(&mut self, def: ComponentDef) -> SettleResult<()> {
        if let Some(existing) = self.by_selector.get(def.selector()) {
            if existing.type_id() != def.type_id() {
                return Err(SettleError::Component {
                    message: format!(
                        "Multiple components match node with tagname {}: {} and {}",
                        def.selector(),
                        existing.name(),
                        def.name()
                    ),
                });
            }
        }
        let def = match self.overrides.get(&def.type_id()) {
            Some(template) => def.with_template(template.clone()),
            None => def,
        };
        self.by_selector.insert(def.selector().to_string(), def.clone());
        self.by_type.insert(def.type_id(), def);
        Ok(())
    }

    /// Declaration rendering `selector`
    #[must_use]
    pub fn def_for_selector(&self, selector: &str) -> Option<ComponentDef> {
        self.by_selector.get(selector).cloned()
    }

    /// Declaration of `C`, with any template override applied; undeclared
    /// components get a fresh declaration
    #[must_use]
    pub fn def_for<C: Component>(&self) -> ComponentDef {
        if let Some(def) = self.by_type.get(&TypeId::of::<C>()) {
            return def.clone();
        }
        let def = ComponentDef::of::<C>();
        match self.overrides.get(&TypeId::of::<C>()) {
            Some(template) => def.with_template(template.clone()),
            None => def,
        }
    }

    /// Whether `C` is declared
    #[must_use]
    pub fn is_declared<C: Component>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<C>())
    }

    /// Number of declarations
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// No declarations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// Result of compiling a [`ModuleConfig`]
#[derive(Debug, Clone)]
pub struct CompiledModule {
    registry: Rc<Registry>,
    injector: Injector,
    env: Rc<ViewEnv>,
    teardown: ModuleTeardownOptions,
}

impl fmt::Debug for ViewEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewEnv")
            .field("components", &self.registry.len())
            .field("schemas", &self.schemas)
            .finish_non_exhaustive()
    }
}

impl CompiledModule {
    /// Component registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Root injector
    #[must_use]
    pub const fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Document the module renders into
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.env.document
    }

    /// Teardown options
    #[must_use]
    pub const fn teardown(&self) -> ModuleTeardownOptions {
        self.teardown
    }

    pub(crate) fn env(&self) -> Rc<ViewEnv> {
        Rc::clone(&self.env)
    }

    /// Log the animation-module misuse error if a bad module is provided
    pub(crate) fn check_animation_module(&self) {
        if let Some(AnimationModuleType(kind)) = self.injector.try_get::<AnimationModuleType>() {
            if BAD_ANIMATION_MODULES.contains(&kind.as_str()) {
                self.env.diagnostics.error(BAD_ANIMATION_MODULE_MSG);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::view::component::TemplateHost;
    use crate::view::injector::Injector;
    use serde_json::Value;

    struct Badge;

    impl Component for Badge {
        fn selector() -> &'static str {
            "app-badge"
        }
        fn template() -> &'static str {
            "<b>badge</b>"
        }
        fn create(_injector: &Injector) -> SettleResult<Self> {
            Ok(Self)
        }
        fn get(&self, _field: &str) -> Option<Value> {
            None
        }
    }

    fn env() -> ModuleEnv {
        ModuleEnv::for_zone(&FakeAsyncZone::new("module"), Diagnostics::new())
    }

    #[test]
    fn test_imports_flatten_with_own_providers_last() {
        let shared = TestModuleDef::new("Shared")
            .declare::<Badge>()
            .provider(Provider::value(1u32));
        let compiled = ModuleConfig::new()
            .imports(TestModuleDef::new("Feature").import(shared))
            .provider(Provider::value(2u32))
            .compile(env())
            .unwrap();
        assert!(compiled.registry().is_declared::<Badge>());
        assert!(compiled.registry().def_for_selector("app-badge").is_some());
        assert_eq!(compiled.injector().get::<u32>().unwrap(), 2);
    }

    #[test]
    fn test_builtins_are_injectable() {
        let compiled = ModuleConfig::new().compile(env()).unwrap();
        let injector = compiled.injector();
        assert!(injector.get::<Rc<dyn Scheduler>>().is_ok());
        assert!(injector.get::<Clock>().is_ok());
        assert!(injector.get::<Document>().is_ok());
        assert!(injector.get::<Diagnostics>().is_ok());
    }

    #[test]
    fn test_super_provider_overrides_module_provider() {
        let compiled = ModuleConfig::new()
            .provider(Provider::value("module".to_string()))
            .super_provider(Provider::value("super".to_string()))
            .compile(env())
            .unwrap();
        assert_eq!(compiled.injector().get::<String>().unwrap(), "super");
    }

    #[test]
    fn test_template_override_applies_to_declared_and_undeclared() {
        let compiled = ModuleConfig::new()
            .declare::<Badge>()
            .template_override::<Badge>("<i>new</i>")
            .template_override::<TemplateHost>("<p></p>")
            .compile(env())
            .unwrap();
        assert_eq!(compiled.registry().def_for::<Badge>().template(), "<i>new</i>");
        assert_eq!(compiled.registry().def_for::<TemplateHost>().template(), "<p></p>");
    }

    #[test]
    fn test_animation_module_check() {
        let diagnostics = Diagnostics::new();
        let compiled = ModuleConfig::new()
            .imports(browser_animations_module())
            .compile(ModuleEnv::for_zone(&FakeAsyncZone::new("m"), diagnostics.clone()))
            .unwrap();
        compiled.check_animation_module();
        assert_eq!(diagnostics.errors(), vec![BAD_ANIMATION_MODULE_MSG]);

        let diagnostics = Diagnostics::new();
        let compiled = ModuleConfig::new()
            .imports(noop_animations_module())
            .compile(ModuleEnv::for_zone(&FakeAsyncZone::new("m"), diagnostics.clone()))
            .unwrap();
        compiled.check_animation_module();
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_selector_clash_is_rejected() {
        struct OtherBadge;
        impl Component for OtherBadge {
            fn selector() -> &'static str {
                "app-badge"
            }
            fn template() -> &'static str {
                ""
            }
            fn create(_injector: &Injector) -> SettleResult<Self> {
                Ok(Self)
            }
            fn get(&self, _field: &str) -> Option<Value> {
                None
            }
        }
        let err = ModuleConfig::new()
            .declare::<Badge>()
            .declare::<OtherBadge>()
            .compile(env())
            .unwrap_err();
        assert!(err.to_string().contains("Multiple components match node with tagname app-badge"));
        // Declaring the same component twice is fine.
        assert!(ModuleConfig::new()
            .declare::<Badge>()
            .imports(TestModuleDef::new("Again").declare::<Badge>())
            .compile(env())
            .is_ok());
    }

    #[test]
    fn test_teardown_defaults() {
        let options = ModuleTeardownOptions::default();
        assert!(!options.destroy_after_each);
        assert!(options.rethrow_errors);
    }
}
