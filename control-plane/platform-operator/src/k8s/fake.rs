//! In-memory [`KubeClient`] for unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::Resource;
use kube::api::{ApiResource, DynamicObject};
use kube::core::TypeMeta;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{KubeClient, api_resource, from_dynamic, to_dynamic};
use crate::error::OperatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOp {
    Get,
    List,
    Create,
    Replace,
    ReplaceStatus,
    Patch,
    Delete,
}

type Key = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    next_rv: u64,
    next_uid: u64,
    writes: usize,
    status_writes: usize,
    faults: VecDeque<(FakeOp, Option<String>, OperatorError)>,
}

impl State {
    fn take_fault(&mut self, op: FakeOp, ar: &ApiResource) -> Option<OperatorError> {
        let pos = self.faults.iter().position(|(o, plural, _)| {
            *o == op && plural.as_deref().is_none_or(|p| p == ar.plural)
        })?;
        self.faults.remove(pos).map(|(_, _, e)| e)
    }

    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }
}

#[derive(Default)]
pub struct FakeClient {
    state: Mutex<State>,
}

fn kind_key(ar: &ApiResource) -> String {
    format!("{}/{}", ar.api_version, ar.plural)
}

fn key(ar: &ApiResource, ns: Option<&str>, name: &str) -> Key {
    (kind_key(ar), ns.map(str::to_string), name.to_string())
}

fn labels_match(obj: &Value, selector: &str) -> bool {
    let labels = obj.pointer("/metadata/labels").and_then(Value::as_object);
    let label = |k: &str| labels.and_then(|l| l.get(k)).and_then(Value::as_str);
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                label(k.trim()) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once('=') {
                label(k.trim()) == Some(v.trim())
            } else {
                label(term).is_some()
            }
        })
}

fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(p) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            let Value::Object(t) = target else {
                return;
            };
            for (k, v) in p {
                if v.is_null() {
                    t.remove(k);
                } else {
                    merge_patch(t.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn stored(ar: &ApiResource, obj: &DynamicObject) -> Value {
    let mut obj = obj.clone();
    if obj.types.is_none() {
        obj.types = Some(TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
    }
    serde_json::to_value(obj).unwrap()
}

fn rv_of(v: &Value) -> Option<&str> {
    v.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn load(v: &Value) -> DynamicObject {
    serde_json::from_value(v.clone()).unwrap()
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object without counting it as a write.
    pub fn seed<K>(&self, obj: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let ar = api_resource::<K>();
        let dynamic = to_dynamic(obj).unwrap();
        let mut s = self.state.lock().unwrap();
        let mut value = stored(&ar, &dynamic);
        let rv = s.bump_rv();
        s.next_uid += 1;
        let uid = format!("uid-{}", s.next_uid);
        let meta = value["metadata"].as_object_mut().unwrap();
        meta.insert("resourceVersion".into(), Value::String(rv));
        meta.entry("uid").or_insert(Value::String(uid));
        meta.entry("generation").or_insert(Value::from(1));
        let k = key(
            &ar,
            dynamic.metadata.namespace.as_deref(),
            dynamic.metadata.name.as_deref().unwrap(),
        );
        s.objects.insert(k, value);
    }

    pub fn get_typed<K>(&self, ns: Option<&str>, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let s = self.state.lock().unwrap();
        s.objects
            .get(&key(&api_resource::<K>(), ns, name))
            .map(|v| from_dynamic(load(v)).unwrap())
    }

    pub fn list_typed<K>(&self) -> Vec<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let kk = kind_key(&api_resource::<K>());
        let s = self.state.lock().unwrap();
        s.objects
            .iter()
            .filter(|(k, _)| k.0 == kk)
            .map(|(_, v)| from_dynamic(load(v)).unwrap())
            .collect()
    }

    pub fn exists<K>(&self, ns: Option<&str>, name: &str) -> bool
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.get_typed::<K>(ns, name).is_some()
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    /// Makes the next matching call fail. `plural` narrows it to one
    /// resource type.
    pub fn fail_next(&self, op: FakeOp, plural: Option<&str>, err: OperatorError) {
        self.state
            .lock()
            .unwrap()
            .faults
            .push_back((op, plural.map(str::to_string), err));
    }
}

#[async_trait]
impl KubeClient for FakeClient {
    async fn get(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, OperatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.take_fault(FakeOp::Get, ar) {
            return Err(e);
        }
        Ok(s.objects.get(&key(ar, ns, name)).map(load))
    }

    async fn list(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, OperatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.take_fault(FakeOp::List, ar) {
            return Err(e);
        }
        let kk = kind_key(ar);
        Ok(s.objects
            .iter()
            .filter(|(k, _)| k.0 == kk)
            .filter(|(k, _)| ns.is_none() || k.1.as_deref() == ns)
            .filter(|(_, v)| label_selector.is_none_or(|sel| labels_match(v, sel)))
            .map(|(_, v)| load(v))
            .collect())
    }

    async fn create(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.take_fault(FakeOp::Create, ar) {
            return Err(e);
        }
        let name = obj.metadata.name.clone().unwrap();
        let k = key(ar, ns, &name);
        if s.objects.contains_key(&k) {
            return Err(OperatorError::Conflict(format!("{name} already exists")));
        }
        let mut value = stored(ar, obj);
        let rv = s.bump_rv();
        s.next_uid += 1;
        let uid = format!("uid-{}", s.next_uid);
        let meta = value["metadata"].as_object_mut().unwrap();
        meta.insert("resourceVersion".into(), Value::String(rv));
        meta.insert("uid".into(), Value::String(uid));
        meta.insert("generation".into(), Value::from(1));
        if let Some(ns) = ns {
            meta.insert("namespace".into(), Value::String(ns.into()));
        }
        s.writes += 1;
        s.objects.insert(k, value.clone());
        Ok(load(&value))
    }

    async fn replace(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.take_fault(FakeOp::Replace, ar) {
            return Err(e);
        }
        let name = obj.metadata.name.clone().unwrap();
        let k = key(ar, ns, &name);
        let Some(current) = s.objects.get(&k).cloned() else {
            return Err(OperatorError::NotFound(name));
        };
        let mut value = stored(ar, obj);
        if rv_of(&value).is_some_and(|rv| Some(rv) != rv_of(&current)) {
            return Err(OperatorError::Conflict(format!("{name} was modified")));
        }
        let mut generation = current
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        if value.get("spec") != current.get("spec") {
            generation += 1;
        }
        match current.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(o) = value.as_object_mut() {
                    o.remove("status");
                }
            }
        }
        let rv = s.bump_rv();
        let meta = value["metadata"].as_object_mut().unwrap();
        meta.insert("resourceVersion".into(), Value::String(rv));
        meta.insert("generation".into(), Value::from(generation));
        meta.insert("uid".into(), current["metadata"]["uid"].clone());
        s.writes += 1;
        s.objects.insert(k, value.clone());
        Ok(load(&value))
    }

    async fn replace_status(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, OperatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.take_fault(FakeOp::ReplaceStatus, ar) {
            return Err(e);
        }
        let name = obj.metadata.name.clone().unwrap();
        let k = key(ar, ns, &name);
        let Some(mut current) = s.objects.get(&k).cloned() else {
            return Err(OperatorError::NotFound(name));
        };
        if obj.metadata.resource_version.as_deref() != rv_of(&current) {
            return Err(OperatorError::Conflict(format!("{name} was modified")));
        }
        current["status"] =
            obj.data.get("status").cloned().unwrap_or(Value::Null);
        let rv = s.bump_rv();
        current["metadata"]["resourceVersion"] = Value::String(rv);
        s.writes += 1;
        s.status_writes += 1;
        s.objects.insert(k, current.clone());
        Ok(load(&current))
    }

    async fn patch(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, OperatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.take_fault(FakeOp::Patch, ar) {
            return Err(e);
        }
        let k = key(ar, ns, name);
        let Some(mut current) = s.objects.get(&k).cloned() else {
            return Err(OperatorError::NotFound(name.to_string()));
        };
        merge_patch(&mut current, patch);
        let rv = s.bump_rv();
        current["metadata"]["resourceVersion"] = Value::String(rv);
        s.writes += 1;
        s.objects.insert(k, current.clone());
        Ok(load(&current))
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        ns: Option<&str>,
        name: &str,
    ) -> Result<bool, OperatorError> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.take_fault(FakeOp::Delete, ar) {
            return Err(e);
        }
        let removed = s.objects.remove(&key(ar, ns, name)).is_some();
        if removed {
            s.writes += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn cm(name: &str, label: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns".into()),
                labels: Some([("team".to_string(), label.to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn label_selector_and_stale_replace() {
        let fake = FakeClient::new();
        fake.seed(&cm("a", "x"));
        fake.seed(&cm("b", "y"));
        let ar = api_resource::<ConfigMap>();
        let found = fake.list(&ar, Some("ns"), Some("team=x")).await.unwrap();
        assert_eq!(found.len(), 1);

        let mut stale = fake.get(&ar, Some("ns"), "a").await.unwrap().unwrap();
        fake.patch(&ar, Some("ns"), "a", &json!({"data": {"k": "v"}}))
            .await
            .unwrap();
        stale.data["data"] = json!({"k": "other"});
        let err = fake.replace(&ar, Some("ns"), &stale).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
