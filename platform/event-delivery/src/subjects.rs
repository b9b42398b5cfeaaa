//! Subject catalogue for the platform's domain events.
//!
//! Format: `{service}.{resource}.{action}`. Wildcard subscriptions use `.>`
//! (one or more tokens) or `.*` (exactly one token).

// Execution service
pub const PURCHASE_ORDER_CREATED: &str = "execution.purchase_order.created";
pub const PURCHASE_ORDER_UPDATED: &str = "execution.purchase_order.updated";
pub const PURCHASE_ORDER_RECEIVED: &str = "execution.purchase_order.received";
pub const PURCHASE_ORDER_CANCELLED: &str = "execution.purchase_order.cancelled";
pub const PURCHASE_ORDER_APPROVED: &str = "execution.purchase_order.approved";
pub const SALES_ORDER_CREATED: &str = "execution.sales_order.created";
pub const SALES_ORDER_UPDATED: &str = "execution.sales_order.updated";
pub const SALES_ORDER_SHIPPED: &str = "execution.sales_order.shipped";
pub const SALES_ORDER_CANCELLED: &str = "execution.sales_order.cancelled";
pub const INVENTORY_UPDATED: &str = "execution.inventory.updated";
pub const INVENTORY_ADJUSTED: &str = "execution.inventory.adjusted";
pub const INVENTORY_TRANSFERRED: &str = "execution.inventory.transferred";

// Buffer engine
pub const BUFFER_CREATED: &str = "ddmrp.buffer.created";
pub const BUFFER_UPDATED: &str = "ddmrp.buffer.updated";
pub const BUFFER_CALCULATED: &str = "ddmrp.buffer.calculated";
pub const BUFFER_STATUS_CHANGED: &str = "ddmrp.buffer.status_changed";
pub const BUFFER_ZONE_CHANGED: &str = "ddmrp.buffer.zone_changed";
pub const ADU_CALCULATED: &str = "ddmrp.adu.calculated";

// Catalog service
pub const PRODUCT_CREATED: &str = "catalog.product.created";
pub const PRODUCT_UPDATED: &str = "catalog.product.updated";
pub const PRODUCT_DELETED: &str = "catalog.product.deleted";
pub const SUPPLIER_CREATED: &str = "catalog.supplier.created";
pub const SUPPLIER_UPDATED: &str = "catalog.supplier.updated";

// Auth service
pub const USER_CREATED: &str = "auth.user.created";
pub const USER_UPDATED: &str = "auth.user.updated";
pub const USER_DELETED: &str = "auth.user.deleted";
pub const USER_LOGGED_IN: &str = "auth.user.logged_in";
pub const USER_LOGGED_OUT: &str = "auth.user.logged_out";
pub const USER_LOGIN_FAILED: &str = "auth.user.login_failed";

// Analytics service
pub const REPORT_GENERATED: &str = "analytics.report.generated";
pub const METRIC_RECORDED: &str = "analytics.metric.recorded";

// AI assistant
pub const INSIGHT_GENERATED: &str = "ai_agent.insight.generated";
pub const ANOMALY_DETECTED: &str = "ai_agent.anomaly.detected";

/// All events of one bounded context
pub const AUTH_ALL: &str = "auth.>";
pub const CATALOG_ALL: &str = "catalog.>";
pub const DDMRP_ALL: &str = "ddmrp.>";
pub const EXECUTION_ALL: &str = "execution.>";
pub const ANALYTICS_ALL: &str = "analytics.>";
pub const AI_AGENT_ALL: &str = "ai_agent.>";
pub const DLQ_ALL: &str = "dlq.>";

/// Durable consumer names, one per consuming service
pub mod consumers {
    pub const EXECUTION_SERVICE: &str = "execution-service";
    pub const DDMRP_SERVICE: &str = "ddmrp-engine-service";
    pub const CATALOG_SERVICE: &str = "catalog-service";
    pub const ANALYTICS_SERVICE: &str = "analytics-service";
    pub const AI_HUB_SERVICE: &str = "ai-intelligence-hub";
    pub const AUTH_SERVICE: &str = "auth-service";
}

/// Service names stamped as an event's `source`
pub mod sources {
    pub const EXECUTION: &str = "execution-service";
    pub const DDMRP: &str = "ddmrp-engine-service";
    pub const CATALOG: &str = "catalog-service";
    pub const AUTH: &str = "auth-service";
    pub const ANALYTICS: &str = "analytics-service";
    pub const AI_HUB: &str = "ai-intelligence-hub";
}

/// Stream name used when a subject has nothing left after stripping
pub const DEFAULT_STREAM_NAME: &str = "DEFAULT";

/// Derive a stream name from a subject.
///
/// Strips `.>`, `.*`, `.`, `>` and `*` (in that order), upper-cases what is
/// left, and falls back to [`DEFAULT_STREAM_NAME`].
///
/// - `auth.>` -> `AUTH`
/// - `catalog.product.*` -> `CATALOGPRODUCT`
pub fn stream_name_from_subject(subject: &str) -> String {
    let stripped = [".>", ".*", ".", ">", "*"]
        .iter()
        .fold(subject.to_string(), |acc, pattern| acc.replace(pattern, ""));

    if stripped.is_empty() {
        return DEFAULT_STREAM_NAME.to_string();
    }

    stripped.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name_from_subject() {
        assert_eq!(stream_name_from_subject("auth.>"), "AUTH");
        assert_eq!(stream_name_from_subject("catalog.product.*"), "CATALOGPRODUCT");
        assert_eq!(stream_name_from_subject("sub.items.created"), "SUBITEMSCREATED");
        assert_eq!(stream_name_from_subject("ai_agent.>"), "AI_AGENT");
    }

    #[test]
    fn test_each_context_has_a_source_and_consumer() {
        let sources = [
            sources::EXECUTION,
            sources::DDMRP,
            sources::CATALOG,
            sources::AUTH,
            sources::ANALYTICS,
            sources::AI_HUB,
        ];
        assert!(sources.iter().all(|s| !s.is_empty()));
        assert!(sources.contains(&consumers::DDMRP_SERVICE));
        assert!(sources.contains(&consumers::AI_HUB_SERVICE));
    }

    #[test]
    fn test_stream_name_defaults() {
        assert_eq!(stream_name_from_subject(""), "DEFAULT");
        assert_eq!(stream_name_from_subject(">"), "DEFAULT");
        assert_eq!(stream_name_from_subject("*.>"), "DEFAULT");
    }
}
