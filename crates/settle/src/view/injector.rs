//! Dependency injection by type.
//!
//! Tokens are Rust types. A [`Provider`] supplies either a value (cloned on
//! every `get`) or a factory (called once per injector, then cached).
//! Injectors form a tree; lookups walk from the requesting injector to the
//! root. Super providers live in a table shared by the whole tree and win
//! over every level.

use crate::result::{SettleError, SettleResult};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

type FactoryFn = Rc<dyn Fn(&Injector) -> SettleResult<Rc<dyn Any>>>;

#[derive(Clone)]
enum Source {
    Value(Rc<dyn Any>),
    Factory(FactoryFn),
}

/// Registration of one token
#[derive(Clone)]
pub struct Provider {
    token: TypeId,
    type_name: &'static str,
    source: Source,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            Source::Value(_) => "value",
            Source::Factory(_) => "factory",
        };
        f.debug_struct("Provider")
            .field("token", &self.type_name)
            .field("kind", &kind)
            .finish()
    }
}

impl Provider {
    /// Provide a fixed value; each `get` returns a clone
    #[must_use]
    pub fn value<T: Clone + 'static>(value: T) -> Self {
        Self {
            token: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            source: Source::Value(Rc::new(value)),
        }
    }

    /// Provide through a factory, resolved lazily and cached per injector
    #[must_use]
    pub fn factory<T: Clone + 'static>(
        factory: impl Fn(&Injector) -> SettleResult<T> + 'static,
    ) -> Self {
        Self {
            token: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            source: Source::Factory(Rc::new(move |injector| {
                factory(injector).map(|v| Rc::new(v) as Rc<dyn Any>)
            })),
        }
    }

    /// Name of the provided type
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether this provider supplies `T`
    #[must_use]
    pub fn provides<T: 'static>(&self) -> bool {
        self.token == TypeId::of::<T>()
    }
}

#[derive(Default)]
struct Table {
    providers: HashMap<TypeId, Provider>,
    cache: HashMap<TypeId, Rc<dyn Any>>,
}

impl Table {
    fn from_providers(providers: Vec<Provider>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.token, p)).collect(),
            cache: HashMap::new(),
        }
    }
}

struct InjectorInner {
    name: String,
    table: RefCell<Table>,
    parent: Option<Injector>,
    overrides: Rc<RefCell<Table>>,
    resolving: Rc<RefCell<Vec<TypeId>>>,
}

/// Injector node. Clones share the same node.
#[derive(Clone)]
pub struct Injector {
    inner: Rc<InjectorInner>,
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("name", &self.inner.name)
            .field("providers", &self.inner.table.borrow().providers.len())
            .field("parent", &self.inner.parent.as_ref().map(|p| p.inner.name.clone()))
            .finish()
    }
}

impl Injector {
    /// Root injector
    #[must_use]
    pub fn new(providers: Vec<Provider>) -> Self {
        Self::root(providers, Vec::new())
    }

    /// Root injector with super providers that override every level
    #[must_use]
    pub fn root(providers: Vec<Provider>, overrides: Vec<Provider>) -> Self {
        Self {
            inner: Rc::new(InjectorInner {
                name: "root".to_string(),
                table: RefCell::new(Table::from_providers(providers)),
                parent: None,
                overrides: Rc::new(RefCell::new(Table::from_providers(overrides))),
                resolving: Rc::new(RefCell::new(Vec::new())),
            }),
        }
    }

    /// Child injector; its providers shadow the parent's
    #[must_use]
    pub fn child(&self, name: impl Into<String>, providers: Vec<Provider>) -> Self {
        Self {
            inner: Rc::new(InjectorInner {
                name: name.into(),
                table: RefCell::new(Table::from_providers(providers)),
                parent: Some(self.clone()),
                overrides: Rc::clone(&self.inner.overrides),
                resolving: Rc::clone(&self.inner.resolving),
            }),
        }
    }

    /// Injector name (`root` or the component that created it)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Resolve `T`
    ///
    /// # Errors
    ///
    /// Returns `NoProvider` if no level provides `T`, or the factory's error
    pub fn get<T: Clone + 'static>(&self) -> SettleResult<T> {
        let any = self.resolve(TypeId::of::<T>(), std::any::type_name::<T>())?;
        any.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| SettleError::NoProvider {
                token: std::any::type_name::<T>().to_string(),
            })
    }

    /// Resolve `T`, or `None` if nothing provides it
    #[must_use]
    pub fn try_get<T: Clone + 'static>(&self) -> Option<T> {
        if self.has::<T>() {
            self.get().ok()
        } else {
            None
        }
    }

    /// Whether any level (or a super provider) provides `T`
    #[must_use]
    pub fn has<T: 'static>(&self) -> bool {
        let token = TypeId::of::<T>();
        if self.inner.overrides.borrow().providers.contains_key(&token) {
            return true;
        }
        let mut current = Some(self);
        while let Some(injector) = current {
            if injector.inner.table.borrow().providers.contains_key(&token) {
                return true;
            }
            current = injector.inner.parent.as_ref();
        }
        false
    }

    fn resolve(&self, token: TypeId, type_name: &str) -> SettleResult<Rc<dyn Any>> {
        if let Some(found) = Self::resolve_in(self, &self.inner.overrides, token, type_name)? {
            return Ok(found);
        }
        let mut current = Some(self);
        while let Some(injector) = current {
            if let Some(found) = Self::resolve_in(self, &injector.inner.table, token, type_name)? {
                return Ok(found);
            }
            current = injector.inner.parent.as_ref();
        }
        Err(SettleError::NoProvider {
            token: type_name.to_string(),
        })
    }

    /// Resolve from one table; factories run against the requesting injector
    fn resolve_in(
        requester: &Self,
        table: &RefCell<Table>,
        token: TypeId,
        type_name: &str,
    ) -> SettleResult<Option<Rc<dyn Any>>> {
        let source = {
            let table = table.borrow();
            if let Some(cached) = table.cache.get(&token) {
                return Ok(Some(Rc::clone(cached)));
            }
            match table.providers.get(&token) {
                Some(provider) => provider.source.clone(),
                None => return Ok(None),
            }
        };
        match source {
            Source::Value(value) => Ok(Some(value)),
            Source::Factory(factory) => {
                if requester.inner.resolving.borrow().contains(&token) {
                    return Err(SettleError::Component {
                        message: format!("Cannot instantiate cyclic dependency! {type_name}"),
                    });
                }
                requester.inner.resolving.borrow_mut().push(token);
                let result = factory(requester);
                requester.inner.resolving.borrow_mut().retain(|t| *t != token);
                let value = result?;
                table.borrow_mut().cache.insert(token, Rc::clone(&value));
                Ok(Some(value))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Clone, PartialEq)]
    struct Greeting(String);

    #[derive(Debug, Clone)]
    struct Counter(Rc<Cell<u32>>);

    #[test]
    fn test_value_provider() {
        let injector = Injector::new(vec![Provider::value(Greeting("hi".to_string()))]);
        assert_eq!(injector.get::<Greeting>().unwrap(), Greeting("hi".to_string()));
        assert!(injector.has::<Greeting>());
        assert!(!injector.has::<u32>());
    }

    #[test]
    fn test_missing_provider_message() {
        let injector = Injector::new(vec![]);
        let err = injector.get::<Greeting>().unwrap_err();
        assert!(err.to_string().starts_with("No provider for "));
        assert!(err.to_string().contains("Greeting"));
        assert!(injector.try_get::<Greeting>().is_none());
    }

    #[test]
    fn test_factory_runs_once_per_injector() {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let injector = Injector::new(vec![Provider::factory(move |_| {
            c.set(c.get() + 1);
            Ok(Counter(Rc::new(Cell::new(0))))
        })]);
        let a = injector.get::<Counter>().unwrap();
        let b = injector.get::<Counter>().unwrap();
        assert_eq!(calls.get(), 1);
        assert!(Rc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn test_factory_resolves_dependencies() {
        let injector = Injector::new(vec![
            Provider::value(Greeting("hi".to_string())),
            Provider::factory(|inj| Ok(format!("{} there", inj.get::<Greeting>()?.0))),
        ]);
        assert_eq!(injector.get::<String>().unwrap(), "hi there");
    }

    #[test]
    fn test_child_shadows_parent() {
        let root = Injector::new(vec![
            Provider::value(Greeting("root".to_string())),
            Provider::value(7u32),
        ]);
        let child = root.child("cmp", vec![Provider::value(Greeting("child".to_string()))]);
        assert_eq!(child.get::<Greeting>().unwrap().0, "child");
        assert_eq!(child.get::<u32>().unwrap(), 7);
        assert_eq!(root.get::<Greeting>().unwrap().0, "root");
    }

    #[test]
    fn test_super_provider_wins_everywhere() {
        let root = Injector::root(
            vec![Provider::value(Greeting("module".to_string()))],
            vec![Provider::value(Greeting("override".to_string()))],
        );
        let child = root.child("cmp", vec![Provider::value(Greeting("component".to_string()))]);
        assert_eq!(root.get::<Greeting>().unwrap().0, "override");
        assert_eq!(child.get::<Greeting>().unwrap().0, "override");
    }

    #[test]
    fn test_cycle_is_reported() {
        let injector = Injector::new(vec![Provider::factory(|inj| {
            inj.get::<Greeting>().map(|g| Greeting(g.0))
        })]);
        let err = injector.get::<Greeting>().unwrap_err();
        assert!(err.to_string().contains("cyclic dependency"));
    }
}
