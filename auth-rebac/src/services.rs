use crate::{
    config::GatewayConfig,
    engine::{PermissionEngine, SpiceDbHttpEngine},
    error::Result,
    gateway::AuthorizationGateway,
    groups::GroupService,
    hierarchy::HierarchyEngine,
    models::CaveatPolicies,
    resources::ResourceService,
};
use std::sync::Arc;
use tracing::info;

/// The gateway and the services built on it, sharing one engine connection
#[derive(Clone)]
pub struct RebacServices {
    pub gateway: AuthorizationGateway,
    pub resources: ResourceService,
    pub groups: GroupService,
}

impl RebacServices {
    pub fn new(engine: Arc<dyn PermissionEngine>, config: &GatewayConfig) -> Self {
        let gateway = AuthorizationGateway::new(engine, config.engine.call_timeout());
        let caveats = CaveatPolicies::new(config.caveats.clone());
        let hierarchy = Arc::new(HierarchyEngine::new(gateway.clone(), config.hierarchy.clone()));

        Self {
            resources: ResourceService::new(gateway.clone(), hierarchy, caveats.clone()),
            groups: GroupService::new(gateway.clone(), caveats),
            gateway,
        }
    }

    /// Connect to the engine named in `config.engine`
    pub fn connect(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        info!("Using permission engine at {}", config.engine.endpoint);
        let engine = SpiceDbHttpEngine::new(&config.engine)?;
        Ok(Self::new(Arc::new(engine), config))
    }
}
