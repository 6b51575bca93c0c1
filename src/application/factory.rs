use std::sync::Arc;

use log::{info, warn};

use super::{class_loader::DirectoryClassLoader, Application};
use crate::{
    bean::{BeanManager, ComponentDescriptor, ComponentFactory, StatefulSessionSettings},
    config::ApplicationConfig,
    core::{AppResult, ClassLoader, ServiceContainer},
    naming::InitialContext,
};

/// Marker directories identifying a deployable application folder
const DEPLOYMENT_MARKERS: [&str; 2] = ["WEB-INF", "META-INF"];

/// Deploys applications found under the container's application base.
pub struct ApplicationFactory;

impl ApplicationFactory {
    /// Deploy one configured application.
    ///
    /// Returns `Ok(None)` when its folder carries no deployment marker.
    pub fn visit(
        container: &ServiceContainer,
        config: &ApplicationConfig,
        factory: Arc<dyn ComponentFactory>,
    ) -> AppResult<Option<Arc<Application>>> {
        let folder = container.app_base().join(&config.name);
        if !DEPLOYMENT_MARKERS
            .iter()
            .any(|marker| folder.join(marker).is_dir())
        {
            warn!(
                "Skipping application {}: {} has no WEB-INF or META-INF directory",
                config.name,
                folder.display()
            );
            return Ok(None);
        }

        // bound into `global` only once everything else succeeded
        let naming = container.global_directory().detached_subdirectory(&config.name);
        let initial_context =
            InitialContext::with_local(container.naming().clone(), naming.clone());

        let mut settings = StatefulSessionSettings::default();
        settings.merge_with_params(&config.params())?;

        let bean_manager = BeanManager::new(
            config.name.clone(),
            factory,
            initial_context.clone(),
            settings,
        );
        for bean in &config.beans {
            bean_manager.register_descriptor(ComponentDescriptor::from(bean))?;
        }

        let mut class_loaders: Vec<Arc<dyn ClassLoader>> =
            vec![Arc::new(DirectoryClassLoader::default_for(&folder))];
        for loader in &config.class_loaders {
            class_loaders.push(Arc::new(DirectoryClassLoader::new(
                loader.name.clone(),
                &folder,
                &loader.directories,
            )));
        }

        container
            .global_directory()
            .bind_directory(&config.name, naming)?;

        let application = Arc::new(Application::new(
            config.name.clone(),
            config.context_path(),
            folder,
            initial_context,
            bean_manager,
            class_loaders,
        ));
        container.add_application(application.clone())?;

        info!(
            "Deployed application {} at {} with {} component(s)",
            application.name(),
            application.context_path(),
            config.beans.len()
        );
        Ok(Some(application))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        bean::{Scope, TypeRegistryFactory},
        config::Config,
        core::AppError,
        naming::NamingContext,
    };

    fn config(app_base: &std::path::Path) -> Config {
        Config::from_yaml(&format!(
            r#"
server:
  app_base: {}
applications:
  - name: shop
    params:
      lifetime: 30
    class_loaders:
      - name: vendor
        directories: [vendor]
    beans:
      - name: Cart
        class: Cart
        scope: stateful
  - name: ghost
"#,
            app_base.display()
        ))
        .unwrap()
    }

    #[test]
    fn deploys_folders_with_markers_only() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("shop/WEB-INF")).unwrap();
        fs::create_dir_all(base.path().join("ghost")).unwrap();

        let conf = config(base.path());
        let container = ServiceContainer::new(base.path()).unwrap();
        let factory = Arc::new(TypeRegistryFactory::new());

        let shop = ApplicationFactory::visit(&container, &conf.applications[0], factory.clone())
            .unwrap()
            .unwrap();
        let ghost =
            ApplicationFactory::visit(&container, &conf.applications[1], factory).unwrap();

        assert!(ghost.is_none());
        assert_eq!(container.applications().list_names(), vec!["shop"]);
        assert_eq!(shop.context_path(), "/shop");
        assert_eq!(shop.class_loaders().len(), 2);
        assert_eq!(shop.naming_identifier(), "app:global/shop");
        assert_eq!(
            shop.bean_manager().settings().lifetime,
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            shop.bean_manager().descriptor("Cart").unwrap().scope,
            Scope::Stateful
        );
        assert!(container
            .naming()
            .search("app:global/shop/Cart", &[])
            .is_ok());
    }

    #[test]
    fn redeploying_the_same_name_fails() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("shop/META-INF")).unwrap();

        let conf = config(base.path());
        let container = ServiceContainer::new(base.path()).unwrap();
        let factory = Arc::new(TypeRegistryFactory::new());

        ApplicationFactory::visit(&container, &conf.applications[0], factory.clone()).unwrap();
        let err = ApplicationFactory::visit(&container, &conf.applications[0], factory)
            .unwrap_err();
        assert!(matches!(err, AppError::NameAlreadyBound { .. }));
    }

    #[test]
    fn failed_deployment_can_be_retried() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("shop/WEB-INF")).unwrap();
        let container = ServiceContainer::new(base.path()).unwrap();
        let factory = Arc::new(TypeRegistryFactory::new());

        let deploy = |lifetime: &str| {
            let conf = Config::from_yaml(&format!(
                r#"
server:
  app_base: {}
applications:
  - name: shop
    params:
      lifetime: {lifetime}
    beans:
      - name: Cart
        class: Cart
        scope: stateful
"#,
                base.path().display()
            ))
            .unwrap();
            ApplicationFactory::visit(&container, &conf.applications[0], factory.clone())
        };

        assert!(matches!(deploy("soon"), Err(AppError::Validation(_))));
        assert!(container.naming().search("app:global/shop", &[]).is_err());
        assert!(container.application("shop").is_none());

        let shop = deploy("30").unwrap().unwrap();
        assert_eq!(shop.bean_manager().descriptors().len(), 1);
        assert!(container
            .naming()
            .search("app:global/shop/Cart", &[])
            .is_ok());
    }
}
