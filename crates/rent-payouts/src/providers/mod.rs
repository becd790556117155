//! Payment provider integrations and the registry that routes transfers across them.

mod accounts;
mod banco_estado;
mod capability;
pub(crate) mod http;
mod paypal;
mod registry;
mod sandbox;
mod stripe;
mod webpay;

pub use accounts::{
    estimate_transfer_cost, infer_bank_code, mask_account_number, normalize_account_number,
    select_payout_account, validate_chilean_account, AccountType, BankAccountInfo,
    BankAccountView, VerificationStatus,
};
pub use banco_estado::BancoEstadoProvider;
pub use capability::{
    AccountBalance, AmountLimits, BankTransactionResult, ProviderCapability, ProviderError,
    ProviderErrorCode, ProviderId, ProviderTransaction, TransactionStatus, TransferRequest,
    VerificationResult,
};
pub use paypal::PaypalProvider;
pub use registry::{
    HttpProviderFactory, MultiVerification, ProviderFactory, ProviderRegistry, ProviderStats,
    RouterPolicy, VerificationAttempt,
};
pub use sandbox::{SandboxFactory, SandboxOutcome, SandboxProvider};
pub use stripe::StripeProvider;
pub use webpay::WebpayProvider;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::Router;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{AccountType, BankAccountInfo, ProviderId, TransferRequest, VerificationStatus};
    use crate::clock::ManualClock;
    use crate::config::{ConfigProvider, ServiceConfig, ServiceKind};
    use crate::payouts::memory::InMemoryConfigStore;

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub(crate) async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock listener");
        let addr = listener.local_addr().expect("mock address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock server");
        });
        format!("http://{addr}")
    }

    /// Config cache holding one enabled, fully credentialed entry for `provider`.
    pub(crate) fn config_for(provider: ProviderId, base_url: &str) -> Arc<ConfigProvider> {
        let store = Arc::new(InMemoryConfigStore::default());
        let kind = match provider {
            ProviderId::Webpay | ProviderId::Stripe => ServiceKind::PaymentGateway,
            ProviderId::BancoEstado => ServiceKind::Bank,
            ProviderId::Paypal => ServiceKind::Wallet,
        };
        let mut config = ServiceConfig::new(provider.id(), provider.display_name(), kind);
        config.credentials.api_key = Some(match provider {
            ProviderId::Stripe => "sk_test_payouts".to_string(),
            _ => "579B532A7440BB0C9079DED94D31EA16".to_string(),
        });
        config.credentials.merchant_id = Some("597055555532".to_string());
        config.credentials.client_id = Some("client-payouts".to_string());
        config.credentials.client_secret = Some("secret-payouts".to_string());
        config.endpoint.base_url = base_url.to_string();
        config.endpoint.timeout_ms = 5_000;
        store.put(config);

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap(),
        ));
        Arc::new(ConfigProvider::new(
            store,
            clock,
            std::time::Duration::from_secs(300),
        ))
    }

    pub(crate) fn account(id: &str) -> BankAccountInfo {
        BankAccountInfo {
            id: id.to_string(),
            user_id: "owner-1".to_string(),
            bank_code: "012".to_string(),
            bank_name: "BancoEstado".to_string(),
            account_type: AccountType::Vista,
            account_number: "012-3456-7890".to_string(),
            account_holder: "María Soto".to_string(),
            rut: Some("12.345.678-5".to_string()),
            is_primary: true,
            is_verified: true,
            verification_status: VerificationStatus::Verified,
        }
    }

    pub(crate) fn platform_account() -> BankAccountInfo {
        BankAccountInfo {
            id: "platform".to_string(),
            user_id: "platform".to_string(),
            bank_code: "012".to_string(),
            bank_name: "BancoEstado".to_string(),
            account_type: AccountType::Checking,
            account_number: "9000-1234-55".to_string(),
            account_holder: "Arriendos Plataforma SpA".to_string(),
            rut: Some("76.123.456-7".to_string()),
            is_primary: true,
            is_verified: true,
            verification_status: VerificationStatus::Verified,
        }
    }

    pub(crate) fn transfer_request(amount: Decimal) -> TransferRequest {
        TransferRequest {
            from: platform_account(),
            to: account("acc-1"),
            amount,
            currency: "CLP".to_string(),
            description: "Payout 2025-04-01 to 2025-04-30".to_string(),
            idempotency_key: "payout:owner-1:2025-04-01:2025-04-30".to_string(),
        }
    }
}
