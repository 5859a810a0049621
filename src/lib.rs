pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod services;

use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::{
    config::AppConfig,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        checkout::CheckoutService, orders::OrderService, payments::PaymentService,
        settlement::SettlementService, webhooks::WebhookService,
    },
};

/// Shared state handed to every handler.
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub event_sender: EventSender,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub payments: Arc<PaymentService>,
    pub settlement: Arc<SettlementService>,
    pub webhooks: WebhookService,
}

impl AppState {
    /// Wires the service graph over one database handle and one gateway
    /// implementation. Tests inject a scripted gateway here.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            gateway,
            event_sender.clone(),
            &config,
        ));
        let settlement = Arc::new(SettlementService::new(db.clone(), event_sender.clone()));
        let checkout = CheckoutService::new(db.clone(), event_sender.clone(), &config);
        let orders = OrderService::new(db.clone(), event_sender.clone(), payments.clone());
        let webhooks = WebhookService::new(
            db.clone(),
            event_sender.clone(),
            settlement.clone(),
            payments.clone(),
        );

        Self {
            db,
            config,
            event_sender,
            checkout,
            orders,
            payments,
            settlement,
            webhooks,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::checkout::create_draft_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::cancel_order,
        handlers::orders::update_order_status,
        handlers::orders::replace_order_items,
        handlers::orders::place_cod_order,
        handlers::payments::create_gateway_order,
        handlers::payments::confirm_payment,
        handlers::payment_webhooks::handle_webhook,
    ),
    components(schemas(
        entities::order::Model,
        entities::order::OrderStatus,
        entities::order_item::Model,
        entities::payment::Model,
        entities::payment::PaymentStatus,
        entities::payment::RefundStatus,
        services::checkout::AddressPayload,
        services::checkout::CreateDraftRequest,
        services::checkout::DraftOrder,
        services::orders::OrderPage,
        services::orders::ReplacementItem,
        services::payments::GatewayOrderResponse,
        handlers::orders::UpdateStatusRequest,
        handlers::orders::ReplaceItemsRequest,
        handlers::orders::OrderDetail,
        handlers::payments::ConfirmPaymentRequest,
        handlers::payments::ConfirmPaymentResponse,
        errors::ErrorResponse,
    )),
    tags(
        (name = "checkout", description = "Cart to draft order"),
        (name = "orders", description = "Order lifecycle and fulfillment"),
        (name = "payments", description = "Gateway integration and webhooks")
    )
)]
pub struct ApiDoc;

/// Builds the HTTP application over an already-wired state.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api-docs/openapi.json",
            axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
        )
        .merge(handlers::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
