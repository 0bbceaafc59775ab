use proptest::prelude::*;
use scopewire::{
    BeanDefinition, Container, ContainerConfig, DefinitionKey, DefinitionSet, Parameters,
    Qualifier, Registry, ScopeId,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Property-based tests for definition bookkeeping and scope lifecycles
mod registry_props {
    use super::*;

    struct Endpoint(String);

    fn endpoint(name: &str) -> BeanDefinition {
        let value = name.to_string();
        BeanDefinition::singleton(Some(Qualifier::named(name)), move |_, _| {
            Ok(Endpoint(value.clone()))
        })
    }

    proptest! {
        #[test]
        fn test_distinct_qualifiers_never_collide(names in prop::collection::hash_set("[a-z]{1,12}", 1..20)) {
            let registry = Registry::new();
            for name in &names {
                prop_assert!(registry.register(endpoint(name), false).is_ok());
            }
            prop_assert_eq!(registry.len(), names.len());
            for name in &names {
                let key = DefinitionKey::of::<Endpoint>(Some(Qualifier::named(name.as_str())));
                prop_assert!(registry.contains(&key));
            }
        }

        #[test]
        fn test_duplicate_rejected_unless_override(name in "[a-z]{1,12}", allow in any::<bool>()) {
            let registry = Registry::new();
            registry.register(endpoint(&name), false).unwrap();

            let result = registry.register(endpoint(&name), allow);
            prop_assert_eq!(result.is_ok(), allow);
            prop_assert_eq!(registry.len(), 1);
        }

        #[test]
        fn test_qualified_resolution_matches_name(names in prop::collection::hash_set("[a-z]{1,12}", 1..10)) {
            let container = Container::new(ContainerConfig::default());
            container
                .load(names.iter().map(|name| endpoint(name)).collect::<DefinitionSet>())
                .unwrap();

            for name in &names {
                let resolved = container
                    .get_qualified::<Endpoint>(&Qualifier::named(name.as_str()))
                    .unwrap();
                prop_assert_eq!(&resolved.0, name);
            }
        }
    }
}

mod holder_props {
    use super::*;

    struct Token(u64);

    proptest! {
        #[test]
        fn test_factory_resolutions_are_distinct(count in 1usize..40) {
            let container = Container::default();
            container
                .register(BeanDefinition::factory(None, |_, params| {
                    Ok(Token(*params.get::<u64>(0)?))
                }))
                .unwrap();

            let tokens: Vec<Arc<Token>> = (0..count as u64)
                .map(|i| {
                    container
                        .get_with::<Token, _>(None, || Parameters::new().with(i))
                        .unwrap()
                })
                .collect();

            let addresses: HashSet<usize> = tokens.iter().map(|t| Arc::as_ptr(t) as usize).collect();
            prop_assert_eq!(addresses.len(), count);
            for (i, token) in tokens.iter().enumerate() {
                prop_assert_eq!(token.0, i as u64);
            }
        }

        #[test]
        fn test_singleton_resolutions_are_identical(count in 1usize..40) {
            let container = Container::default();
            container
                .register(BeanDefinition::singleton(None, |_, _| Ok(Token(7))))
                .unwrap();

            let first = container.get::<Token>().unwrap();
            for _ in 1..count {
                prop_assert!(Arc::ptr_eq(&first, &container.get::<Token>().unwrap()));
            }
        }
    }
}

mod scope_props {
    use super::*;

    proptest! {
        #[test]
        fn test_active_scopes_track_open_and_close(
            ids in prop::collection::hash_set("[a-z]{1,8}", 1..16),
            close_mask in prop::collection::vec(any::<bool>(), 16),
        ) {
            let container = Container::default();
            let ids: Vec<String> = ids.into_iter().collect();
            let scopes: Vec<_> = ids
                .iter()
                .map(|id| container.create_scope(id.as_str(), DefinitionSet::new(), None).unwrap())
                .collect();

            let mut expected = Vec::new();
            for (scope, close) in scopes.iter().zip(&close_mask) {
                if *close {
                    scope.close();
                    scope.close();
                } else {
                    expected.push(scope.id().clone());
                }
            }
            expected.sort();

            prop_assert_eq!(container.active_scopes(), expected);
            for (id, close) in ids.iter().zip(&close_mask) {
                let found = container.get_scope_or_none(&ScopeId::new(id.as_str()));
                prop_assert_eq!(found.is_none(), *close);
            }
        }
    }
}
