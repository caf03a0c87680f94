use async_trait::async_trait;
use kube::Client;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch,
    PatchParams, PostParams,
};
use serde_json::Value;

use super::KubeClient;
use crate::error::OperatorError;

/// [`KubeClient`] backed by the API server.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
}

impl KubeApiClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, ns: Option<&str>) -> Api<DynamicObject> {
        match ns {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

fn name_of(obj: &DynamicObject) -> Result<&str, OperatorError> {
    obj.metadata
        .name
        .as_deref()
        .ok_or_else(|| OperatorError::Malformed("object without a name".into()))
}

#[async_trait]
impl KubeClient for KubeApiClient {
    async fn get(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, OperatorError> {
        Ok(self.api(ar, ns).get_opt(name).await?)
    }

    async fn list(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, OperatorError> {
        let mut lp = ListParams::default();
        if let Some(sel) = label_selector {
            lp = lp.labels(sel);
        }
        Ok(self.api(ar, ns).list(&lp).await?.items)
    }

    async fn create(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError> {
        Ok(self.api(ar, ns).create(&PostParams::default(), obj).await?)
    }

    async fn replace(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError> {
        let name = name_of(obj)?;
        Ok(self
            .api(ar, ns)
            .replace(name, &PostParams::default(), obj)
            .await?)
    }

    async fn replace_status(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError> {
        let name = name_of(obj)?;
        // a stale resourceVersion in `obj` fails with a conflict
        let data = serde_json::to_vec(obj)?;
        Ok(self
            .api(ar, ns)
            .replace_status(name, &PostParams::default(), data)
            .await?)
    }

    async fn patch(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, OperatorError> {
        Ok(self
            .api(ar, ns)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
    ) -> Result<bool, OperatorError> {
        match self.api(ar, ns).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) => match OperatorError::from(e) {
                OperatorError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }
}
