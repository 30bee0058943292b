//! Misuse of secrets: wrong argument positions, bad keys and syntax errors

use crate::coordinator::{correlation_id, SecretEntries};
use crate::core::ScenarioError;
use crate::environment::node::QueryRequest;
use crate::scenarios::{Scenario, ScenarioContext};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

const SUITE: &str = "invalid secrets";

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            SUITE,
            "encrypt_decrypt_secret_mode",
            "RQ.SRS-021.Secrets.DataType",
            encrypt_decrypt_secret_mode,
        ),
        Scenario::new(
            SUITE,
            "encrypt_decrypt_secret_message",
            "RQ.SRS-021.Secrets.Usability",
            encrypt_decrypt_secret_message,
        ),
        Scenario::new(
            SUITE,
            "user_with_secret_password",
            "RQ.SRS-021.Secrets.CreateUser",
            user_with_secret_password,
        ),
        Scenario::new(
            SUITE,
            "clientside_exception",
            "RQ.SRS-021.Secrets.ClientSideExceptions",
            clientside_exception,
        ),
        Scenario::new(
            SUITE,
            "select_with_invalid_keys/empty_string",
            "RQ.SRS-021.Secrets.InvalidKeys",
            invalid_key_empty_string,
        ),
        Scenario::new(
            SUITE,
            "select_with_invalid_keys/utf8_string",
            "RQ.SRS-021.Secrets.InvalidKeys",
            invalid_key_utf8_string,
        ),
        Scenario::new(
            SUITE,
            "select_with_invalid_keys/decimal",
            "RQ.SRS-021.Secrets.InvalidKeys",
            invalid_key_decimal,
        ),
        Scenario::new(
            SUITE,
            "select_with_invalid_keys/expression",
            "RQ.SRS-021.Secrets.InvalidKeys",
            invalid_key_expression,
        ),
        Scenario::new(
            SUITE,
            "secret_with_column_value_key",
            "RQ.SRS-021.Secrets.ColumnValueName",
            secret_with_column_value_key,
        ),
        Scenario::new(SUITE, "multiple_inputs", "RQ.SRS-021.Secrets.Syntax", multiple_inputs),
    ]
}

/// Run each `(sql, query_id)` expecting `code` and `message` under one audited config
async fn expect_failures(
    ctx: &ScenarioContext,
    entries: SecretEntries,
    secret: &str,
    code: i32,
    queries: &[(String, String, &str)],
) -> Result<(), ScenarioError> {
    let fragment = ctx.secrets_fragment(&entries);
    let query_ids: Vec<String> = queries.iter().map(|(_, id, _)| id.clone()).collect();

    ctx.with_audited_config(&fragment, secret, &query_ids, async {
        for (sql, query_id, message) in queries {
            ctx.query(
                QueryRequest::new(sql.as_str())
                    .exit_code(code)
                    .message(*message)
                    .query_id(query_id),
            )
            .await?;
        }
        Ok(())
    })
    .await
}

fn encrypt_decrypt_secret_mode(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let message = "DB::Exception: Illegal type of argument #1 'mode' of function encrypt, expected encryption mode string, got Secret";
        let queries = [
            (
                "SELECT encrypt(secret('secret_mode'), 'to be encrypted', 'key');".to_string(),
                correlation_id(),
                message,
            ),
            (
                "SELECT decrypt(secret('secret_mode'), encrypt(secret('secret_mode'),  'to be encrypted', 'key'), 'key')".to_string(),
                correlation_id(),
                message,
            ),
        ];
        let entries = SecretEntries::new().with("secret_mode", "aes-128-ecb");
        let code = ctx.codes().illegal_type_of_argument;
        expect_failures(&ctx, entries, "aes-128-ecb", code, &queries).await
    }
    .boxed()
}

fn encrypt_decrypt_secret_message(
    ctx: Arc<ScenarioContext>,
) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let message = "DB::Exception: Illegal type of argument #2 'input' of function encrypt, expected plaintext, got Secret";
        let queries = [
            (
                "SELECT encrypt('aes-128-ecb', secret('secret_message'), 'passwordpassword');".to_string(),
                correlation_id(),
                message,
            ),
            (
                "SELECT decrypt('aes-128-ecb', encrypt('aes-128-ecb',  secret('secret_message'), 'passwordpassword'), 'passwordpassword')".to_string(),
                correlation_id(),
                message,
            ),
        ];
        let secret = "secret_words_to_be_encrypted";
        let entries = SecretEntries::new().with("secret_message", secret);
        let code = ctx.codes().illegal_type_of_argument;
        expect_failures(&ctx, entries, secret, code, &queries).await
    }
    .boxed()
}

fn user_with_secret_password(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let sql = format!(
            "CREATE USER user_{} IDENTIFIED BY secret('secret_message')",
            correlation_id()
        );
        let position = sql.find("secret(").map(|i| i + 1).unwrap_or_default();
        let message = format!("Exception: Syntax error: failed at position {} ('secret')", position);
        let queries = [(sql, correlation_id(), message.as_str())];

        let secret = "secret_user_password";
        let entries = SecretEntries::new().with("secret_message", secret);
        let code = ctx.codes().syntax_error;
        expect_failures(&ctx, entries, secret, code, &queries).await
    }
    .boxed()
}

fn clientside_exception(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let secret = "secret_password";
        let table = format!("table_{}", correlation_id());
        let query_ids = [correlation_id(), correlation_id(), correlation_id()];
        let fragment = ctx.secrets_fragment(&SecretEntries::new().with("secret_key", secret));
        let syntax_error = |sql: String, query_id: &String| {
            QueryRequest::new(sql)
                .exit_code(ctx.codes().syntax_error)
                .message("Exception: Syntax error")
                .query_id(query_id)
        };

        ctx.with_audited_config(&fragment, secret, &query_ids, async {
            ctx.query(syntax_error(
                "SELECTs secret('secret_key')".to_string(),
                &query_ids[0],
            ))
            .await?;
            ctx.query(syntax_error(
                format!(
                    "CREATE USERs user_{} IDENTIFIED BY secret('secret_key')",
                    correlation_id()
                ),
                &query_ids[1],
            ))
            .await?;

            ctx.with_memory_table(&table, async {
                ctx.query(syntax_error(
                    format!("INSERTs INTO {} VALUES (secret('secret_key'))", table),
                    &query_ids[2],
                ))
                .await
                .map(|_| ())
            })
            .await
        })
        .await
    }
    .boxed()
}

/// Select a secret by an invalid key expression; no config is applied
async fn select_with_invalid_key(ctx: &ScenarioContext, key: &str, code: i32) -> Result<(), ScenarioError> {
    ctx.query(
        QueryRequest::new(format!("SELECT secret({})", key))
            .exit_code(code)
            .message("Exception: "),
    )
    .await
    .map(|_| ())
}

fn invalid_key_empty_string(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let code = ctx.codes().cannot_get_secret;
        select_with_invalid_key(&ctx, "''", code).await
    }
    .boxed()
}

fn invalid_key_utf8_string(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let code = ctx.codes().cannot_get_secret;
        select_with_invalid_key(&ctx, "'🔑'", code).await
    }
    .boxed()
}

fn invalid_key_decimal(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let code = ctx.codes().illegal_type_of_argument;
        select_with_invalid_key(&ctx, "toDecimal256(1,10)", code).await
    }
    .boxed()
}

fn invalid_key_expression(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let code = ctx.codes().cannot_get_secret;
        select_with_invalid_key(&ctx, "concat('x','y')", code).await
    }
    .boxed()
}

fn secret_with_column_value_key(
    ctx: Arc<ScenarioContext>,
) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let secret = "secret_password";
        let key = "secret_key";
        let table = format!("table_{}", correlation_id());
        let query_id = correlation_id();
        let fragment = ctx.secrets_fragment(&SecretEntries::new().with(key, secret));

        ctx.with_audited_config(&fragment, secret, &[query_id.clone()], async {
            ctx.with_memory_table(&table, async {
                ctx.query(QueryRequest::new(format!(
                    "INSERT INTO {} VALUES ('{}')",
                    table, key
                )))
                .await?;
                ctx.query(
                    QueryRequest::new(format!("SELECT secret(x) FROM {}", table))
                        .exit_code(ctx.codes().illegal_column)
                        .message("Exception: Illegal type of argument #1 ")
                        .query_id(&query_id),
                )
                .await
                .map(|_| ())
            })
            .await
        })
        .await
    }
    .boxed()
}

fn multiple_inputs(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let queries = [(
            "SELECT secret('a','b')".to_string(),
            correlation_id(),
            "Exception: Number of arguments for function secret doesn't match: passed 2",
        )];
        let entries = SecretEntries::new()
            .with("a", "sub_password_a")
            .with("b", "sub_password_b");
        let code = ctx.codes().number_of_arguments_doesnt_match;
        expect_failures(&ctx, entries, "sub_password", code, &queries).await
    }
    .boxed()
}
