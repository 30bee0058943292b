//! Supported uses of secrets that must not reveal the secret value

use crate::coordinator::{correlation_id, SecretEntries};
use crate::core::ScenarioError;
use crate::environment::node::QueryRequest;
use crate::scenarios::{Scenario, ScenarioContext};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

const SUITE: &str = "valid secrets";

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            SUITE,
            "encrypt_decrypt_secret_key",
            "RQ.SRS-021.Secrets.EncryptDecrypt",
            encrypt_decrypt_secret_key,
        ),
        Scenario::new(
            SUITE,
            "aes_encrypt_decrypt",
            "RQ.SRS-021.Secrets.AESEncryptDecrypt",
            aes_encrypt_decrypt,
        ),
        Scenario::new(SUITE, "mysql_table", "RQ.SRS-021.Secrets.MySQL", mysql_table),
        Scenario::new(SUITE, "mysql_func", "RQ.SRS-021.Secrets.MySQL", mysql_func),
    ]
}

/// Run every query successfully with `literal_password` configured
async fn expect_success(ctx: &ScenarioContext, secret: &str, queries: &[&str]) -> Result<(), ScenarioError> {
    let entries = SecretEntries::new().with("literal_password", secret);
    let fragment = ctx.secrets_fragment(&entries);
    let query_ids: Vec<String> = queries.iter().map(|_| correlation_id()).collect();

    ctx.with_audited_config(&fragment, secret, &query_ids, async {
        for (sql, query_id) in queries.iter().zip(&query_ids) {
            ctx.query(QueryRequest::new(*sql).query_id(query_id)).await?;
        }
        Ok(())
    })
    .await
}

fn encrypt_decrypt_secret_key(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        expect_success(
            &ctx,
            "passwordpassword",
            &[
                "SELECT encrypt('aes-128-ecb', 'to be encrypted', secret('literal_password'));",
                "SELECT decrypt('aes-128-ecb', encrypt('aes-128-ecb',  'to be encrypted', secret('literal_password')), secret('literal_password'));",
            ],
        )
        .await
    }
    .boxed()
}

fn aes_encrypt_decrypt(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        expect_success(
            &ctx,
            "passwordpassword",
            &[
                "SELECT aes_encrypt_mysql('aes-128-ecb', 'to be encrypted', secret('literal_password'));",
                "SELECT aes_decrypt_mysql('aes-128-ecb', aes_encrypt_mysql('aes-128-ecb',  'to be encrypted', secret('literal_password')), secret('literal_password'));",
            ],
        )
        .await
    }
    .boxed()
}

/// MySQL user names are limited to 32 characters
fn mysql_user_name() -> String {
    let mut name = format!("user_{}", correlation_id());
    name.truncate(31);
    name
}

fn mysql_table(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let secret = "secret_password";
        let table = format!("table_{}", correlation_id());
        let user = mysql_user_name();
        let query_id = correlation_id();
        let mysql_name = ctx.mysql()?.name().to_string();
        let fragment = ctx.secrets_fragment(&SecretEntries::new().with("mysql_password", secret));

        ctx.with_audited_config(&fragment, secret, &[query_id.clone()], async {
            ctx.with_mysql_table(&table, &user, secret, async {
                ctx.query(QueryRequest::new(format!("DROP TABLE IF EXISTS {}", table)))
                    .await?;
                let create = format!(
                    "CREATE TABLE {table}\n(\n    id UInt8,\n    x UInt8\n)\nENGINE = MySQL('{host}:3306', 'db', '{table}', '{user}', secret('mysql_password'))\n",
                    table = table,
                    host = mysql_name,
                    user = user
                );
                let outcome = async {
                    ctx.query(QueryRequest::new(create).query_id(&query_id)).await?;
                    ctx.query(QueryRequest::new(format!("SELECT * FROM {}", table)))
                        .await
                        .map(|_| ())
                }
                .await;
                let cleanup = ctx
                    .query(QueryRequest::new(format!("DROP TABLE IF EXISTS {}", table)))
                    .await;
                outcome.and(cleanup.map(|_| ()))
            })
            .await
        })
        .await
    }
    .boxed()
}

fn mysql_func(ctx: Arc<ScenarioContext>) -> BoxFuture<'static, Result<(), ScenarioError>> {
    async move {
        let secret = "secret_password";
        let table = format!("table_{}", correlation_id());
        let user = mysql_user_name();
        let query_id = correlation_id();
        let mysql_name = ctx.mysql()?.name().to_string();
        let fragment = ctx.secrets_fragment(&SecretEntries::new().with("mysql_password", secret));

        ctx.with_audited_config(&fragment, secret, &[query_id.clone()], async {
            ctx.with_mysql_table(&table, &user, secret, async {
                ctx.mysql_command(&format!(
                    "MYSQL_PWD=password mysql -D db -u user -e \"INSERT INTO {}(x) VALUES (1)\"",
                    table
                ))
                .await?;
                ctx.query(
                    QueryRequest::new(format!(
                        "SELECT * FROM mysql('{}:3306', 'db', '{}', '{}', secret('mysql_password'))",
                        mysql_name, table, user
                    ))
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
