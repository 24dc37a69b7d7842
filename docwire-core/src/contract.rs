//! Contract enforcement around any [`Backend`].
//!
//! [`ContractBackend`] wraps a concrete engine and checks the parts of the
//! contract that do not depend on the engine: database and collection names are
//! validated before they reach it, documents are validated for storage before
//! they are written, and every call observes its [`Context`]. Databases and
//! collections resolved through the wrapper are wrapped as well.

use async_trait::async_trait;
use tracing::debug;

use crate::{
    backend::{
        Backend, Collection, CollectionInfo, CreateCollectionParams, Database, DeleteResult, ExplainResult,
        InsertResult, QueryParams, QueryResult, UpdateResult,
    },
    context::Context,
    document::Document,
    error::{BackendError, BackendErrorCode, DocWireError, DocWireResult},
    value::Value,
};

const MAX_DATABASE_NAME_LEN: usize = 63;
const MAX_COLLECTION_NAME_LEN: usize = 235;

/// Checks a database name.
///
/// Names are 1 to 63 characters of ASCII letters, digits, `_` and `-`.
pub fn validate_database_name(name: &str) -> Result<(), BackendError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_DATABASE_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');

    if valid {
        Ok(())
    } else {
        Err(BackendError::new(
            BackendErrorCode::DatabaseNameInvalid,
            format!("Invalid database name: '{name}'"),
        ))
    }
}

/// Checks a collection name.
///
/// Names must be non-empty, at most 235 bytes, free of `$` and NUL, and must
/// not use the reserved `system.` prefix.
pub fn validate_collection_name(name: &str) -> Result<(), BackendError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_COLLECTION_NAME_LEN
        && !name.contains('$')
        && !name.contains('\0')
        && !name.starts_with("system.");

    if valid {
        Ok(())
    } else {
        Err(BackendError::new(
            BackendErrorCode::CollectionNameInvalid,
            format!("Invalid collection name: '{name}'"),
        ))
    }
}

fn validate_documents(docs: &[Document]) -> DocWireResult<()> {
    for doc in docs {
        doc.validate_for_storage()?;
    }
    Ok(())
}

/// A [`Backend`] wrapper that enforces the engine-independent contract.
#[derive(Debug)]
pub struct ContractBackend<B> {
    inner: B,
}

impl<B: Backend> ContractBackend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: Backend> Backend for ContractBackend<B> {
    async fn database(&self, ctx: &Context, name: &str) -> DocWireResult<Box<dyn Database>> {
        ctx.check()?;
        validate_database_name(name)?;

        let inner = self.inner.database(ctx, name).await?;
        Ok(Box::new(ContractDatabase { inner }))
    }

    async fn list_databases(&self, ctx: &Context) -> DocWireResult<Vec<String>> {
        ctx.run(self.inner.list_databases(ctx)).await
    }

    async fn drop_database(&self, ctx: &Context, name: &str) -> DocWireResult<()> {
        validate_database_name(name)?;
        ctx.run(self.inner.drop_database(ctx, name)).await
    }
}

#[derive(Debug)]
struct ContractDatabase {
    inner: Box<dyn Database>,
}

#[async_trait]
impl Database for ContractDatabase {
    async fn collection(&self, ctx: &Context, name: &str) -> DocWireResult<Box<dyn Collection>> {
        ctx.check()?;
        validate_collection_name(name)?;

        let inner = self.inner.collection(ctx, name).await?;
        Ok(Box::new(ContractCollection { inner }))
    }

    async fn create_collection(&self, ctx: &Context, params: CreateCollectionParams) -> DocWireResult<()> {
        validate_collection_name(&params.name)?;
        if let Some(capped) = &params.capped {
            if capped.max_size <= 0 {
                return Err(DocWireError::bad_value("the 'size' field is required when 'capped' is true"));
            }
        }

        ctx.run(self.inner.create_collection(ctx, params)).await
    }

    async fn drop_collection(&self, ctx: &Context, name: &str) -> DocWireResult<()> {
        validate_collection_name(name)?;
        ctx.run(self.inner.drop_collection(ctx, name)).await
    }

    async fn list_collections(&self, ctx: &Context) -> DocWireResult<Vec<CollectionInfo>> {
        ctx.run(self.inner.list_collections(ctx)).await
    }
}

#[derive(Debug)]
struct ContractCollection {
    inner: Box<dyn Collection>,
}

#[async_trait]
impl Collection for ContractCollection {
    async fn query(&self, ctx: &Context, params: QueryParams) -> DocWireResult<QueryResult> {
        ctx.run(self.inner.query(ctx, params)).await
    }

    async fn insert_all(&self, ctx: &Context, docs: Vec<Document>) -> DocWireResult<InsertResult> {
        validate_documents(&docs)?;

        let res = ctx.run(self.inner.insert_all(ctx, docs)).await;
        if let Err(DocWireError::Backend(err)) = &res {
            if err.code == BackendErrorCode::DuplicateKey {
                debug!(error = %err, "insert rejected by duplicate key");
            }
        }
        res
    }

    async fn update_all(&self, ctx: &Context, docs: Vec<Document>) -> DocWireResult<UpdateResult> {
        validate_documents(&docs)?;
        ctx.run(self.inner.update_all(ctx, docs)).await
    }

    async fn delete_all(&self, ctx: &Context, ids: Vec<Value>) -> DocWireResult<DeleteResult> {
        if ids.is_empty() {
            return Ok(DeleteResult::default());
        }
        ctx.run(self.inner.delete_all(ctx, ids)).await
    }

    async fn explain(&self, ctx: &Context, params: QueryParams) -> DocWireResult<ExplainResult> {
        ctx.run(self.inner.explain(ctx, params)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_names() {
        assert!(validate_database_name("test_db-1").is_ok());
        assert_eq!(
            validate_database_name("").unwrap_err().code,
            BackendErrorCode::DatabaseNameInvalid
        );
        assert!(validate_database_name("bad.name").is_err());
        assert!(validate_database_name(&"x".repeat(64)).is_err());
    }

    #[test]
    fn collection_names() {
        assert!(validate_collection_name("users.archive").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("a$b").is_err());
        assert_eq!(
            validate_collection_name("system.users").unwrap_err().code,
            BackendErrorCode::CollectionNameInvalid
        );
    }
}
