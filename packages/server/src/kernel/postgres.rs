//! Postgres-backed session store and unit of work

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::common::SessionId;
use crate::domains::auth::models::{Session, SessionRotation};
use crate::domains::directory::{Device, User};
use crate::kernel::{BaseIdentityTransaction, BaseSessionStore, BaseUnitOfWork};

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseSessionStore for PgSessionStore {
    async fn upsert(&self, session: &Session) -> Result<()> {
        session.upsert(&self.pool).await
    }

    async fn find(&self, id: SessionId) -> Result<Option<Session>> {
        Session::find_by_id(id, &self.pool).await
    }

    async fn rotate(&self, rotation: &SessionRotation) -> Result<bool> {
        Session::rotate(rotation, &self.pool).await
    }

    async fn delete(&self, id: SessionId) -> Result<()> {
        Session::delete(id, &self.pool).await
    }

    async fn delete_matching(&self, id: SessionId, digest: &[u8]) -> Result<bool> {
        Session::delete_matching(id, digest, &self.pool).await
    }
}

/// Opens a Postgres transaction per login
#[derive(Clone)]
pub struct PgUnitOfWork {
    pool: PgPool,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseUnitOfWork for PgUnitOfWork {
    async fn begin(&self) -> Result<Box<dyn BaseIdentityTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgIdentityTransaction { tx }))
    }
}

/// Dropping without commit rolls the transaction back (sqlx behaviour)
pub struct PgIdentityTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BaseIdentityTransaction for PgIdentityTransaction {
    async fn upsert_user_and_device(
        &mut self,
        phone: &str,
        label: Option<&str>,
        push_token: Option<&str>,
    ) -> Result<(User, Device)> {
        let user = User::upsert_by_phone(phone, &mut *self.tx).await?;
        let device = Device::upsert(user.id, label, push_token, &mut *self.tx).await?;
        Ok((user, device))
    }

    async fn insert_session(&mut self, session: &Session) -> Result<()> {
        session.upsert(&mut *self.tx).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
