use signals_analytics::Correlator;
use signals_core::AppContext;
use signals_delivery::DeliveryService;
use signals_notify::BusSender;
use signals_sync::SyncScheduler;
use std::sync::Arc;

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: AppContext,
    pub delivery: Arc<DeliveryService>,
    pub correlator: Arc<Correlator>,
    pub scheduler: SyncScheduler,
    pub bus: BusSender,
}

impl ApiState {
    pub fn new(
        ctx: AppContext,
        delivery: Arc<DeliveryService>,
        scheduler: SyncScheduler,
        bus: BusSender,
    ) -> Self {
        let correlator = Arc::new(Correlator::new(ctx.store.clone()));
        Self {
            ctx,
            delivery,
            correlator,
            scheduler,
            bus,
        }
    }
}
