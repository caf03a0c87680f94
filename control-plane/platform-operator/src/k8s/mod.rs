//! Cluster access used by the orchestration code.
//!
//! Everything goes through [`KubeClient`], a small object-level API over
//! [`DynamicObject`]s. The typed helpers in this module convert to and from
//! concrete resource types so callers rarely touch dynamic objects directly.

mod client;
#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::Resource;
use kube::api::{ApiResource, DynamicObject, ObjectMeta};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::OperatorError;

pub use client::KubeApiClient;

/// What a create-or-update call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, OperatorError>;

    /// Lists objects, across all namespaces when `ns` is `None`.
    async fn list(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, OperatorError>;

    async fn create(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError>;

    /// Full update; fails with a conflict when `resourceVersion` is stale.
    async fn replace(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError>;

    /// Status subresource update guarded by `resourceVersion`.
    async fn replace_status(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError>;

    /// JSON merge patch.
    async fn patch(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, OperatorError>;

    /// Returns `false` when the object was already gone.
    async fn delete(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
    ) -> Result<bool, OperatorError>;
}

pub fn api_resource<K: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, OperatorError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub fn from_dynamic<K: DeserializeOwned>(
    obj: DynamicObject,
) -> Result<K, OperatorError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn object_key<K: Resource>(obj: &K) -> Result<(Option<String>, String), OperatorError> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| OperatorError::Malformed("object without a name".into()))?;
    Ok((meta.namespace.clone(), name))
}

pub async fn get<K>(
    client: &dyn KubeClient,
    ns: Option<&str>,
    name: &str,
) -> Result<Option<K>, OperatorError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match client.get(&api_resource::<K>(), ns, name).await? {
        Some(obj) => Ok(Some(from_dynamic(obj)?)),
        None => Ok(None),
    }
}

pub async fn list<K>(
    client: &dyn KubeClient,
    ns: Option<&str>,
    label_selector: Option<&str>,
) -> Result<Vec<K>, OperatorError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .list(&api_resource::<K>(), ns, label_selector)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

/// Fetches the object named like `obj`, applies `mutate` and writes it back
/// only if the serialized form changed. When nothing exists yet, `obj` is
/// mutated and created.
pub async fn create_or_update<K, F>(
    client: &dyn KubeClient,
    obj: K,
    mutate: F,
) -> Result<OperationResult, OperatorError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send,
    F: FnOnce(&mut K) + Send,
{
    let ar = api_resource::<K>();
    let (ns, name) = object_key(&obj)?;
    match client.get(&ar, ns.as_deref(), &name).await? {
        None => {
            let mut obj = obj;
            mutate(&mut obj);
            client.create(&ar, ns.as_deref(), &to_dynamic(&obj)?).await?;
            Ok(OperationResult::Created)
        }
        Some(existing) => {
            let mut current: K = from_dynamic(existing)?;
            let before = serde_json::to_value(&current)?;
            mutate(&mut current);
            if serde_json::to_value(&current)? == before {
                return Ok(OperationResult::Unchanged);
            }
            client
                .replace(&ar, ns.as_deref(), &to_dynamic(&current)?)
                .await?;
            Ok(OperationResult::Updated)
        }
    }
}

/// [`create_or_update`] for resources without a compiled-in type.
pub async fn create_or_update_dynamic<F>(
    client: &dyn KubeClient,
    ar: &ApiResource,
    obj: DynamicObject,
    mutate: F,
) -> Result<OperationResult, OperatorError>
where
    F: FnOnce(&mut DynamicObject) + Send,
{
    let (ns, name) = object_key(&obj)?;
    match client.get(ar, ns.as_deref(), &name).await? {
        None => {
            let mut obj = obj;
            mutate(&mut obj);
            client.create(ar, ns.as_deref(), &obj).await?;
            Ok(OperationResult::Created)
        }
        Some(mut current) => {
            let before = serde_json::to_value(&current)?;
            mutate(&mut current);
            if serde_json::to_value(&current)? == before {
                return Ok(OperationResult::Unchanged);
            }
            client.replace(ar, ns.as_deref(), &current).await?;
            Ok(OperationResult::Updated)
        }
    }
}

/// Creates the namespace if missing and makes sure `labels` are set on it.
pub async fn ensure_namespace(
    client: &dyn KubeClient,
    name: &str,
    labels: &[(&str, &str)],
) -> Result<OperationResult, OperatorError> {
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    create_or_update(client, ns, |ns| {
        let current = ns.metadata.labels.get_or_insert_with(Default::default);
        for (k, v) in labels {
            current.insert(k.to_string(), v.to_string());
        }
        if current.is_empty() {
            ns.metadata.labels = None;
        }
    })
    .await
}

pub async fn delete<K>(
    client: &dyn KubeClient,
    ns: Option<&str>,
    name: &str,
) -> Result<bool, OperatorError>
where
    K: Resource<DynamicType = ()>,
{
    client.delete(&api_resource::<K>(), ns, name).await
}

/// Deletes every object matching the selector; returns how many went away.
pub async fn delete_by_label<K>(
    client: &dyn KubeClient,
    ns: Option<&str>,
    label_selector: &str,
) -> Result<usize, OperatorError>
where
    K: Resource<DynamicType = ()>,
{
    let ar = api_resource::<K>();
    let mut deleted = 0;
    for obj in client.list(&ar, ns, Some(label_selector)).await? {
        let Some(name) = obj.metadata.name.as_deref() else {
            continue;
        };
        let obj_ns = obj.metadata.namespace.as_deref().or(ns);
        if client.delete(&ar, obj_ns, name).await? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

pub async fn replace_status<K>(
    client: &dyn KubeClient,
    obj: &K,
) -> Result<(), OperatorError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let (ns, _) = object_key(obj)?;
    client
        .replace_status(&api_resource::<K>(), ns.as_deref(), &to_dynamic(obj)?)
        .await?;
    Ok(())
}

pub async fn patch<K>(
    client: &dyn KubeClient,
    ns: Option<&str>,
    name: &str,
    patch: &Value,
) -> Result<(), OperatorError>
where
    K: Resource<DynamicType = ()>,
{
    client.patch(&api_resource::<K>(), ns, name, patch).await?;
    Ok(())
}
