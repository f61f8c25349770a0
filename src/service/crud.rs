//! Generic CRUD execution against PostgreSQL.

use crate::config::Settings;
use crate::error::AppError;
use crate::query::{PageWindow, QueryPlan};
use crate::schema::{Association, EntityDefinition};
use crate::service::validation::RequestValidator;
use crate::sql::{
    aggregate, count, delete_where, insert, row_to_json, select_by_column, select_by_id, select_page,
    update_where, PgBindValue, QueryBuf, Scope,
};
use crate::store::user_lookup_sql;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgExecutor};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::collections::HashMap;

/// One page of a list query together with what the envelope reports about it.
#[derive(Debug)]
pub struct ListPage {
    pub rows: Vec<Value>,
    pub window: PageWindow,
    pub filters: Map<String, Value>,
    pub aggregates: Option<Value>,
}

/// Everything a create needs besides the payload.
pub struct CreateContext<'a> {
    pub settings: &'a Settings,
    pub associations: &'a HashMap<String, Association>,
    pub identity: Option<&'a str>,
}

pub struct CrudService;

impl CrudService {
    /// Count, clamp the window, then fetch the page (plus aggregates when asked for).
    pub async fn list(
        pool: &PgPool,
        entity: &EntityDefinition,
        plan: &QueryPlan,
        scope: Option<&Scope<'_>>,
    ) -> Result<ListPage, AppError> {
        let q = count(entity, plan, scope);
        let total: i64 = bind_all(&q).fetch_one(pool).await?.try_get("total")?;
        let window = plan.pagination.window(total.max(0) as u64);

        let q = select_page(entity, plan, &window, scope);
        let rows = fetch_all(pool, &q).await?;

        let aggregates = match aggregate(entity, plan, scope) {
            Some(q) => {
                let row = bind_all(&q).fetch_one(pool).await?;
                row.try_get::<Option<Value>, _>("aggregates")?
            }
            None => None,
        };
        Ok(ListPage {
            rows,
            window,
            filters: plan.raw.clone(),
            aggregates,
        })
    }

    /// Fetch one row by primary key.
    pub async fn read(pool: &PgPool, entity: &EntityDefinition, raw_id: &str) -> Result<Option<Value>, AppError> {
        let Some(id) = entity.parse_id(raw_id) else {
            return Ok(None);
        };
        let q = select_by_id(entity, id);
        fetch_optional(pool, &q).await.map_err(AppError::from)
    }

    /// List scoped to the acting user's records. The user must exist.
    pub async fn list_by_owner(
        pool: &PgPool,
        settings: &Settings,
        entity: &EntityDefinition,
        plan: &QueryPlan,
        identity: Option<&str>,
    ) -> Result<ListPage, AppError> {
        let claim = identity.ok_or_else(|| AppError::Unauthorized("Unauthorized".into()))?;
        let owner = Self::owner_external_id(pool, settings, claim)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        let scope = Scope {
            column: &settings.owner_field,
            value: Value::String(owner),
        };
        Self::list(pool, entity, plan, Some(&scope)).await
    }

    /// Insert one record in a transaction, linking it to its owner and to an associated record.
    pub async fn create(
        pool: &PgPool,
        entity: &EntityDefinition,
        ctx: CreateContext<'_>,
        body: Map<String, Value>,
    ) -> Result<Value, AppError> {
        let mut tx = pool.begin().await?;
        match Self::create_in(&mut *tx, entity, &ctx, body).await {
            Ok(row) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::Transaction(format!("commit {}: {}", entity.name, e)))?;
                tracing::info!(entity = %entity.name, "record created");
                Ok(row)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(entity = %entity.name, error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn create_in(
        conn: &mut sqlx::PgConnection,
        entity: &EntityDefinition,
        ctx: &CreateContext<'_>,
        mut raw: Map<String, Value>,
    ) -> Result<Value, AppError> {
        let settings = ctx.settings;
        let assoc_ref = raw.remove(&settings.assoc_ref_field).filter(|v| !v.is_null());
        let assoc_entity = raw.remove(&settings.assoc_entity_field);
        let claim = owner_claim(ctx.identity, &raw, settings);
        let owns_records = entity.column(&settings.owner_field).is_some();

        let owner = match claim {
            Some(claim) => Some(
                Self::owner_external_id(&mut *conn, settings, &claim)
                    .await?
                    .ok_or_else(|| AppError::NotFound("User not found".into()))?,
            ),
            None if owns_records => return Err(AppError::NotFound("User not found".into())),
            None => None,
        };

        let mut body = normalize_body(entity, &raw);

        if let Some(reference) = assoc_ref {
            let assoc = pick_association(ctx.associations, assoc_entity.as_ref().and_then(Value::as_str), settings)?;
            let target = &assoc.target;
            if target.column(&settings.external_id_field).is_none() {
                return Err(AppError::Validation(format!(
                    "{} has no {} column",
                    assoc.alias, settings.external_id_field
                )));
            }
            let q = select_by_column(target, &settings.external_id_field, reference, true);
            let related = fetch_optional(&mut *conn, &q)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{} not found", assoc.alias)))?;

            let updates: Map<String, Value> = assoc
                .updatable_fields
                .iter()
                .filter(|f| target.column(f).is_some())
                .filter_map(|f| raw.get(f).map(|v| (f.clone(), v.clone())))
                .collect();
            if !updates.is_empty() {
                RequestValidator::validate_partial(target, &updates)?;
                let pk = related.get(&target.primary_key).cloned().unwrap_or(Value::Null);
                let q = update_where(target, &updates, &[(target.primary_key.as_str(), pk)]);
                fetch_optional(&mut *conn, &q)
                    .await
                    .map_err(|e| AppError::from_write(e, &assoc.alias))?;
                tracing::debug!(alias = %assoc.alias, fields = ?updates.keys().collect::<Vec<_>>(), "associated record updated");
            }

            let fk = related.get(&assoc.referenced_column).cloned().unwrap_or(Value::Null);
            body.insert(assoc.foreign_key_column.clone(), fk);
        }

        if let (Some(owner), true) = (owner, owns_records) {
            body.insert(settings.owner_field.clone(), Value::String(owner));
        }

        RequestValidator::validate(entity, &body)?;
        let q = insert(entity, &body);
        fetch_optional(&mut *conn, &q)
            .await
            .map_err(|e| AppError::from_write(e, &entity.name))?
            .ok_or_else(|| AppError::Transaction(format!("insert into {} returned no row", entity.name)))
    }

    /// Update a record the acting user owns. Primary key and owner field are never overwritten.
    pub async fn update(
        pool: &PgPool,
        settings: &Settings,
        entity: &EntityDefinition,
        raw_id: &str,
        identity: Option<&str>,
        raw: Map<String, Value>,
    ) -> Result<Value, AppError> {
        let not_updated = || AppError::NotAffected("Data not updated".into());
        let keys = Self::owned_keys(pool, settings, entity, raw_id, identity, &raw)
            .await?
            .ok_or_else(not_updated)?;
        let body = normalize_body(entity, &raw);
        RequestValidator::validate_partial(entity, &body)?;
        let q = update_where(entity, &body, &keys);
        fetch_optional(pool, &q)
            .await
            .map_err(|e| AppError::from_write(e, &entity.name))?
            .ok_or_else(not_updated)
    }

    /// Delete a record the acting user owns. Returns the deleted row.
    pub async fn delete(
        pool: &PgPool,
        settings: &Settings,
        entity: &EntityDefinition,
        raw_id: &str,
        identity: Option<&str>,
        raw: &Map<String, Value>,
    ) -> Result<Value, AppError> {
        let not_deleted = || AppError::NotAffected("Data not deleted".into());
        let keys = Self::owned_keys(pool, settings, entity, raw_id, identity, raw)
            .await?
            .ok_or_else(not_deleted)?;
        let q = delete_where(entity, &keys);
        fetch_optional(pool, &q)
            .await
            .map_err(|e| AppError::from_write(e, &entity.name))?
            .ok_or_else(not_deleted)
    }

    /// `pk = id AND owner_field = owner`; the owner part only applies to owner-scoped tables.
    /// None when `raw_id` cannot be a primary key value, so no row can match.
    async fn owned_keys<'a>(
        pool: &PgPool,
        settings: &'a Settings,
        entity: &'a EntityDefinition,
        raw_id: &str,
        identity: Option<&str>,
        raw: &Map<String, Value>,
    ) -> Result<Option<Vec<(&'a str, Value)>>, AppError> {
        let Some(id) = entity.parse_id(raw_id) else {
            return Ok(None);
        };
        let mut keys = vec![(entity.primary_key.as_str(), id)];
        if entity.column(&settings.owner_field).is_none() {
            return Ok(Some(keys));
        }
        let claim = owner_claim(identity, raw, settings).ok_or_else(|| AppError::NotFound("User not found".into()))?;
        let owner = Self::owner_external_id(pool, settings, &claim)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        keys.push((settings.owner_field.as_str(), Value::String(owner)));
        Ok(Some(keys))
    }

    /// Resolve an identity (user id or external id) to the user's external id.
    pub async fn owner_external_id<'e, E>(exec: E, settings: &Settings, claim: &str) -> Result<Option<String>, AppError>
    where
        E: PgExecutor<'e>,
    {
        let sql = user_lookup_sql(&settings.db_schema, &settings.users_table, &settings.external_id_field);
        tracing::debug!(sql = %sql, claim = %claim, "owner lookup");
        let found: Option<Option<String>> = sqlx::query_scalar(&sql).bind(claim).fetch_optional(exec).await?;
        Ok(found.flatten())
    }
}

/// The acting user: authenticated identity first, else the owner field of the body.
fn owner_claim(identity: Option<&str>, body: &Map<String, Value>, settings: &Settings) -> Option<String> {
    if let Some(id) = identity {
        return Some(id.to_string());
    }
    match body.get(&settings.owner_field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Payload keys mapped onto real column names; unknown keys are dropped.
pub fn normalize_body(entity: &EntityDefinition, raw: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in raw {
        if let Some(col) = entity.resolve_column(k) {
            // An exact key wins over a case-converted duplicate.
            if col.name == *k || !out.contains_key(&col.name) {
                out.insert(col.name.clone(), v.clone());
            }
        }
    }
    out
}

/// The association a reference targets: the named alias, else the first non-user association by alias.
fn pick_association<'a>(
    associations: &'a HashMap<String, Association>,
    requested: Option<&str>,
    settings: &Settings,
) -> Result<&'a Association, AppError> {
    if let Some(alias) = requested {
        return associations
            .get(alias)
            .ok_or_else(|| AppError::Validation(format!("unknown association {}", alias)));
    }
    let mut aliases: Vec<&String> = associations.keys().collect();
    aliases.sort();
    aliases
        .into_iter()
        .filter_map(|a| associations.get(a))
        .find(|a| a.target.table_name != settings.users_table)
        .ok_or_else(|| AppError::Validation("no association accepts a reference".into()))
}

fn bind_all(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

async fn fetch_all<'e, E>(exec: E, q: &QueryBuf) -> Result<Vec<Value>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let rows = bind_all(q).fetch_all(exec).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn fetch_optional<'e, E>(exec: E, q: &QueryBuf) -> Result<Option<Value>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let row = bind_all(q).fetch_optional(exec).await?;
    Ok(row.as_ref().map(row_to_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssociationRules;
    use crate::schema::entity::tests::{col, tasks_entity};
    use crate::schema::{build_associations, EntityRegistry, ForeignKey};
    use serde_json::json;
    use std::sync::Arc;

    fn associations() -> HashMap<String, Association> {
        let goals = EntityDefinition::new("public", "goals", vec![col("id", "int4"), col("custom_id", "varchar")]);
        let users = EntityDefinition::new("public", "users", vec![col("id", "int4"), col("custom_id", "varchar")]);
        let reg = EntityRegistry::new(vec![tasks_entity(), goals, users]);
        let tasks: Arc<EntityDefinition> = reg.get("tasks").unwrap().clone();
        let fks = vec![
            ForeignKey {
                column_name: "user_custom_id".into(),
                referenced_table: "users".into(),
                referenced_column: "custom_id".into(),
            },
            ForeignKey {
                column_name: "goal_id".into(),
                referenced_table: "goals".into(),
                referenced_column: "id".into(),
            },
        ];
        build_associations(&reg, &tasks, &fks, &AssociationRules::default())
    }

    #[test]
    fn identity_takes_precedence_over_body_owner() {
        let s = Settings::default();
        let body = json!({"user_custom_id": "from-body"});
        let body = body.as_object().unwrap();
        assert_eq!(owner_claim(Some("u-7"), body, &s).as_deref(), Some("u-7"));
        assert_eq!(owner_claim(None, body, &s).as_deref(), Some("from-body"));
        assert_eq!(owner_claim(None, &Map::new(), &s), None);
    }

    #[test]
    fn body_keys_resolve_to_columns() {
        let e = tasks_entity();
        let raw = json!({"userCustomId": "u-1", "created_at": "2024-01-01T00:00:00Z", "bogus": 1, "name": "run"});
        let body = normalize_body(&e, raw.as_object().unwrap());
        assert_eq!(body["user_custom_id"], "u-1");
        assert_eq!(body["createdAt"], "2024-01-01T00:00:00Z");
        assert_eq!(body["name"], "run");
        assert!(!body.contains_key("bogus"));
    }

    #[test]
    fn default_association_skips_users() {
        let assoc = associations();
        let s = Settings::default();
        assert_eq!(pick_association(&assoc, None, &s).unwrap().alias, "goals");
        assert_eq!(pick_association(&assoc, Some("users"), &s).unwrap().alias, "users");
        assert!(pick_association(&assoc, Some("weeks"), &s).is_err());
        assert!(pick_association(&HashMap::new(), None, &s).is_err());
    }

    #[tokio::test]
    async fn ids_that_cannot_be_keys_never_reach_the_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/none")
            .unwrap();
        pool.close().await;
        let e = tasks_entity();
        let s = Settings::default();
        assert!(CrudService::read(&pool, &e, "abc").await.unwrap().is_none());

        let err = CrudService::update(&pool, &s, &e, "abc", Some("u-1"), Map::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NotAffected(ref m) if m == "Data not updated"));
        let err = CrudService::delete(&pool, &s, &e, "99999999999", Some("u-1"), &Map::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NotAffected(ref m) if m == "Data not deleted"));
    }

    #[tokio::test]
    async fn owner_lookup_on_closed_pool_is_an_error() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/none")
            .unwrap();
        pool.close().await;
        let res = CrudService::owner_external_id(&pool, &Settings::default(), "u-1").await;
        assert!(matches!(res, Err(AppError::Db(_))));
    }
}
