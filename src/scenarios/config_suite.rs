//! Secrets backend configuration layouts

use crate::coordinator::{correlation_id, SecretEntries};
use crate::core::ScenarioError;
use crate::environment::node::QueryRequest;
use crate::scenarios::{Scenario, ScenarioContext, CANNOT_GET_SECRET, SERIALIZATION_NOT_IMPLEMENTED};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

const SUITE: &str = "config";

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(SUITE, "select", "RQ.SRS-021.Secrets.Select", select),
        Scenario::new(
            SUITE,
            "utf8_secret_message",
            "RQ.SRS-021.Secrets.UTF8Message",
            utf8_secret_message,
        ),
        Scenario::new(SUITE, "long_secret_name", "RQ.SRS-021.Secrets.LongKey", long_secret_name),
        Scenario::new(
            SUITE,
            "invalid_secrets_config/blank_key",
            "RQ.SRS-021.Secrets.Backend.InvalidConfig",
            invalid_config_blank_key,
        ),
        Scenario::new(
            SUITE,
            "invalid_secrets_config/utf8_key",
            "RQ.SRS-021.Secrets.Backend.InvalidConfig",
            invalid_config_utf8_key,
        ),
        Scenario::new(
            SUITE,
            "inaccessible_secret_password",
            "RQ.SRS-021.Secrets.Backend.Plaintext.Subsection.Wrapping",
            inaccessible_secret_password,
        ),
        Scenario::new(
            SUITE,
            "multiple_subsections",
            "RQ.SRS-021.Secrets.Backend.Plaintext.Subsection",
            multiple_subsections,
        ),
        Scenario::new(
            SUITE,
            "duplicate_secret_names",
            "RQ.SRS-021.Secrets.Duplicate",
            duplicate_secret_names,
        ),
        Scenario::new(
            SUITE,
            "secret_backend",
            "RQ.SRS-021.Secrets.Backend.SecretBackend",
            secret_backend,
        ),
        Scenario::new(
            SUITE,
            "multiple_options",
            "RQ.SRS-021.Secrets.Backend.MultipleOptions",
            multiple_options,
        ),
        Scenario::new(
            SUITE,
            "config_permissions",
            "RQ.SRS-021.Secrets.ConfigPermission",
            config_permissions,
        ),
    ]
}

/// Apply `entries` and select `secret('<key>')`, expecting the serialization error
async fn select_serialization_error(
    ctx: &ScenarioContext,
    entries: SecretEntries,
    secret: &str,
    key: &str,
) -> Result<(), ScenarioError> {
    let query_id = correlation_id();
    let fragment = ctx.secrets_fragment(&entries);
    let request = QueryRequest::new(format!("SELECT secret('{}')", key))
        .exit_code(ctx.codes().not_implemented)
        .message(SERIALIZATION_NOT_IMPLEMENTED)
        .query_id(&query_id);

    ctx.with_audited_config(&fragment, secret, &[query_id.clone()], async {
        ctx.query(request).await.map(|_| ())
    })
    .await
}

fn select(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let entries = SecretEntries::new().with("literal_password", "secret_password");
        select_serialization_error(&ctx, entries, "secret_password", "literal_password").await
    }
    .boxed()
}

fn utf8_secret_message(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let entries = SecretEntries::new().with("utf8_secret", "🔑");
        select_serialization_error(&ctx, entries, "🔑", "utf8_secret").await
    }
    .boxed()
}

fn long_secret_name(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let key = "a".repeat(1024);
        let entries = SecretEntries::new().with(key.as_str(), "secret_password");
        select_serialization_error(&ctx, entries, "secret_password", &key).await
    }
    .boxed()
}

async fn invalid_config(ctx: &ScenarioContext, key: &str) -> Result<(), ScenarioError> {
    let entries = SecretEntries::new().with(key, "secret_password");
    let fragment = ctx.secrets_fragment(&entries);
    ctx.coordinator().expect_rejected(&fragment).await
}

fn invalid_config_blank_key(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move { invalid_config(&ctx, "").await }.boxed()
}

fn invalid_config_utf8_key(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move { invalid_config(&ctx, "'🔑'").await }.boxed()
}

fn sub_passwords() -> SecretEntries {
    SecretEntries::new().with(
        "passwords",
        SecretEntries::new()
            .with("a", "sub_password_a")
            .with("b", "sub_password_b"),
    )
}

fn inaccessible_secret_password(
    ctx: Arc<ScenarioContext>,
) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let query_id = correlation_id();
        let fragment = ctx.inaccessible_fragment(&sub_passwords(), "inaccessible_password");
        let request = QueryRequest::new("SELECT secret('passwords')")
            .exit_code(ctx.codes().cannot_get_secret)
            .message(CANNOT_GET_SECRET)
            .query_id(&query_id);

        ctx.with_audited_config(&fragment, "inaccessible_password", &[query_id.clone()], async {
            ctx.query(request).await.map(|_| ())
        })
        .await
    }
    .boxed()
}

fn multiple_subsections(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let query_ids = [correlation_id(), correlation_id()];
        let fragment = ctx.secrets_fragment(&sub_passwords());

        ctx.with_audited_config(&fragment, "sub_password", &query_ids, async {
            for (key, query_id) in ["passwords.a", "passwords.b"].iter().zip(&query_ids) {
                ctx.query(
                    QueryRequest::new(format!("SELECT secret('{}')", key))
                        .exit_code(ctx.codes().not_implemented)
                        .message(SERIALIZATION_NOT_IMPLEMENTED)
                        .query_id(query_id),
                )
                .await?;
            }
            Ok(())
        })
        .await
    }
    .boxed()
}

fn duplicate_secret_names(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let query_id = correlation_id();
        // the second value replaces the first
        let entries = SecretEntries::new()
            .with("a", "passwordpassword")
            .with("a", "passwordpassword_b");
        let fragment = ctx.secrets_fragment(&entries);
        let request = QueryRequest::new(
            "SELECT aes_encrypt_mysql('aes-128-ecb', 'to be encrypted', secret('a'))",
        )
        .query_id(&query_id);

        ctx.with_audited_config(&fragment, "passwordpassword", &[query_id.clone()], async {
            ctx.query(request).await.map(|_| ())
        })
        .await
    }
    .boxed()
}

fn secret_backend(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let entries = SecretEntries::new()
            .with("secret_backend", "plaintext")
            .with("secret_message", "secret_password");
        select_serialization_error(&ctx, entries, "secret_password", "secret_message").await
    }
    .boxed()
}

fn multiple_options(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let query_ids = [correlation_id(), correlation_id()];
        let entries = SecretEntries::new()
            .with("secret_message_0", "secret_password")
            .with("secret_message_1", "secret_password");
        let fragment = ctx.secrets_fragment(&entries);

        ctx.with_audited_config(&fragment, "secret_password", &query_ids, async {
            for (key, query_id) in ["secret_message_0", "secret_message_1"].iter().zip(&query_ids) {
                ctx.query(
                    QueryRequest::new(format!("SELECT secret('{}')", key))
                        .exit_code(ctx.codes().not_implemented)
                        .message(SERIALIZATION_NOT_IMPLEMENTED)
                        .query_id(query_id),
                )
                .await?;
            }
            Ok(())
        })
        .await
    }
    .boxed()
}

fn config_permissions(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let query_id = correlation_id();
        let entries = SecretEntries::new()
            .with("secret_message_0", "secret_password")
            .with("secret_message_1", "secret_password");
        let fragment = ctx.secrets_fragment(&entries);
        let artifact = fragment.artifact_path();

        ctx.with_audited_config(&fragment, "secret_password", &[query_id.clone()], async {
            let chmod = format!("chmod 600 {}", artifact.display());
            let output = ctx.node().command(&chmod).await?;
            if !output.success() {
                return Err(ScenarioError::Command {
                    command: chmod,
                    exit_code: output.exit_code,
                });
            }

            ctx.query(
                QueryRequest::new("SELECT secret('secret_message')")
                    .exit_code(ctx.codes().cannot_get_secret)
                    .message(CANNOT_GET_SECRET)
                    .query_id(&query_id),
            )
            .await
            .map(|_| ())
        })
        .await
    }
    .boxed()
}
