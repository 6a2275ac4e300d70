//! # In-Memory Providers
//!
//! Fakes for every provider trait, used by unit and integration tests and by
//! `--dry-run` style experiments without cloud access.
//!
//! [`MemoryCluster`] also simulates the sync operator: whenever the cluster
//! is read, stores whose service account carries a role annotation become
//! ready, and sync requests copy the upstream value from the shared
//! [`MemorySecretStore`] into the target secret. Refreshes follow the
//! request's refresh interval on the tokio clock, so paused-time tests can
//! drive passive rotation.
//!
//! Faults are injected per operation with [`FaultInjector::fail_next`].

use super::{
    AccountResolver, ClusterApi, ClusterSecret, CreateOutcome, IdentityProvider,
    ObservedPolicy, ObservedRole, ObservedServiceAccount, ObservedStoreBinding,
    ObservedSyncRequest, PolicyProvider, Providers, Readiness, SecretMetadata,
    SecretStoreProvider,
};
use crate::constants::MAX_POLICY_VERSIONS;
use crate::descriptor::{
    parse_statements, parse_trust_policy, SecretName, SecretSyncRequest, SecretValue,
    StoreBinding, SyncStatus,
};
use crate::error::{ProvisionError, ResourceKind, Result};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failure returned by the next call of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injected {
    /// Throttling or network failure
    Transient,
    /// Ownership conflict reported by the backend
    Conflict,
    /// Unclassified backend failure (e.g. access denied)
    Provider,
}

/// Per-operation queue of injected failures
#[derive(Debug, Default)]
pub struct FaultInjector {
    queued: Mutex<HashMap<String, VecDeque<Injected>>>,
}

impl FaultInjector {
    /// Fail the next call of `operation` with `fault`
    pub fn fail_next(&self, operation: &str, fault: Injected) {
        lock(&self.queued)
            .entry(operation.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Fail the next `times` calls of `operation`
    pub fn fail_times(&self, operation: &str, fault: Injected, times: usize) {
        for _ in 0..times {
            self.fail_next(operation, fault);
        }
    }

    fn check(&self, operation: &str) -> Result<()> {
        let fault = lock(&self.queued)
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match fault {
            None => Ok(()),
            Some(Injected::Transient) => Err(ProvisionError::transient(operation, "Throttling: rate exceeded")),
            Some(Injected::Conflict) => Err(ProvisionError::conflict(
                ResourceKind::Secret,
                operation,
                "injected conflict",
            )),
            Some(Injected::Provider) => Err(ProvisionError::provider(
                operation,
                anyhow::anyhow!("AccessDenied: injected failure"),
            )),
        }
    }
}

/// Secret store keyed by `<app>/<resource>`
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<BTreeMap<String, String>>,
    creates: AtomicUsize,
    puts: AtomicUsize,
    pub faults: FaultInjector,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value as if it had been created out of band
    pub fn insert(&self, name: &str, value: &str) {
        lock(&self.values).insert(name.to_string(), value.to_string());
    }

    pub fn value(&self, name: &str) -> Option<String> {
        lock(&self.values).get(name).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn arn(name: &str) -> String {
        format!("arn:aws:secretsmanager:us-east-1:000000000000:secret:{name}-AbCdEf")
    }
}

#[async_trait]
impl SecretStoreProvider for MemorySecretStore {
    async fn describe_secret(&self, name: &SecretName) -> Result<Option<SecretMetadata>> {
        self.faults.check("secrets.describe")?;
        let key = name.to_string();
        Ok(lock(&self.values).contains_key(&key).then(|| SecretMetadata {
            arn: Self::arn(&key),
            name: key,
        }))
    }

    async fn create_secret(&self, name: &SecretName, value: &SecretValue) -> Result<CreateOutcome> {
        self.faults.check("secrets.create")?;
        let mut values = lock(&self.values);
        let key = name.to_string();
        if values.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        values.insert(key, value.expose().to_string());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }

    async fn put_secret_value(&self, name: &SecretName, value: &SecretValue) -> Result<()> {
        self.faults.check("secrets.put")?;
        let mut values = lock(&self.values);
        let key = name.to_string();
        let Some(slot) = values.get_mut(&key) else {
            return Err(ProvisionError::provider(
                "secrets.put",
                anyhow::anyhow!("ResourceNotFoundException: secret {key} not found"),
            ));
        };
        *slot = value.expose().to_string();
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_secret_value(&self, name: &SecretName) -> Result<SecretValue> {
        self.faults.check("secrets.read")?;
        let key = name.to_string();
        lock(&self.values)
            .get(&key)
            .map(|value| SecretValue::new(value.clone()))
            .ok_or_else(|| {
                ProvisionError::provider(
                    "secrets.read",
                    anyhow::anyhow!("ResourceNotFoundException: secret {key} not found"),
                )
            })
    }
}

#[derive(Debug)]
struct PolicyRecord {
    /// (version id, document), oldest first
    versions: Vec<(String, String)>,
    default_version: String,
    next_version: usize,
    hidden_reads: usize,
}

#[derive(Debug)]
struct RoleRecord {
    trust_policy: String,
    attached: BTreeSet<String>,
    hidden_reads: usize,
}

/// IAM policies, roles and the account facts they are keyed by
#[derive(Debug)]
pub struct MemoryIam {
    account_id: String,
    oidc_issuer: String,
    policies: Mutex<BTreeMap<String, PolicyRecord>>,
    roles: Mutex<BTreeMap<String, RoleRecord>>,
    propagation_lag: AtomicUsize,
    policy_creates: AtomicUsize,
    role_creates: AtomicUsize,
    version_creates: AtomicUsize,
    pub faults: FaultInjector,
}

impl MemoryIam {
    pub fn new(account_id: &str, oidc_issuer: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            oidc_issuer: oidc_issuer.to_string(),
            policies: Mutex::default(),
            roles: Mutex::default(),
            propagation_lag: AtomicUsize::new(0),
            policy_creates: AtomicUsize::new(0),
            role_creates: AtomicUsize::new(0),
            version_creates: AtomicUsize::new(0),
            faults: FaultInjector::default(),
        }
    }

    /// New policies and roles stay invisible for this many reads
    pub fn set_propagation_lag(&self, reads: usize) {
        self.propagation_lag.store(reads, Ordering::SeqCst);
    }

    fn policy_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:policy/{name}", self.account_id)
    }

    /// Seed a policy with one version per document, the last one default
    pub fn insert_policy(&self, name: &str, documents: &[&str]) {
        let versions: Vec<(String, String)> = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (format!("v{}", i + 1), (*doc).to_string()))
            .collect();
        let default_version = versions
            .last()
            .map(|(id, _)| id.clone())
            .unwrap_or_default();
        lock(&self.policies).insert(
            self.policy_arn(name),
            PolicyRecord {
                next_version: versions.len() + 1,
                versions,
                default_version,
                hidden_reads: 0,
            },
        );
    }

    pub fn insert_role(&self, name: &str, trust_policy: &str, attached: &[&str]) {
        lock(&self.roles).insert(
            name.to_string(),
            RoleRecord {
                trust_policy: trust_policy.to_string(),
                attached: attached.iter().map(|arn| (*arn).to_string()).collect(),
                hidden_reads: 0,
            },
        );
    }

    /// Make the next `reads` lookups of a role miss, as if another run
    /// created it after this one looked
    pub fn hide_role(&self, name: &str, reads: usize) {
        if let Some(record) = lock(&self.roles).get_mut(name) {
            record.hidden_reads = reads;
        }
    }

    pub fn policy_versions(&self, name: &str) -> Vec<String> {
        lock(&self.policies)
            .get(&self.policy_arn(name))
            .map(|record| record.versions.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn role_trust_policy(&self, name: &str) -> Option<String> {
        lock(&self.roles).get(name).map(|r| r.trust_policy.clone())
    }

    pub fn policy_create_calls(&self) -> usize {
        self.policy_creates.load(Ordering::SeqCst)
    }

    pub fn role_create_calls(&self) -> usize {
        self.role_creates.load(Ordering::SeqCst)
    }

    pub fn policy_version_calls(&self) -> usize {
        self.version_creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyProvider for MemoryIam {
    async fn get_policy(&self, arn: &str) -> Result<Option<ObservedPolicy>> {
        self.faults.check("iam.get_policy")?;
        let mut policies = lock(&self.policies);
        let Some(record) = policies.get_mut(arn) else {
            return Ok(None);
        };
        if record.hidden_reads > 0 {
            record.hidden_reads -= 1;
            return Ok(None);
        }
        let document = record
            .versions
            .iter()
            .find(|(id, _)| *id == record.default_version)
            .map(|(_, doc)| doc.clone())
            .unwrap_or_default();
        Ok(Some(ObservedPolicy {
            arn: arn.to_string(),
            default_version: record.default_version.clone(),
            statements: parse_statements(&document)?,
            other_versions: record
                .versions
                .iter()
                .filter(|(id, _)| *id != record.default_version)
                .map(|(id, _)| id.clone())
                .collect(),
        }))
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<CreateOutcome> {
        self.faults.check("iam.create_policy")?;
        let mut policies = lock(&self.policies);
        let arn = self.policy_arn(name);
        if policies.contains_key(&arn) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        policies.insert(
            arn,
            PolicyRecord {
                versions: vec![("v1".to_string(), document.to_string())],
                default_version: "v1".to_string(),
                next_version: 2,
                hidden_reads: self.propagation_lag.load(Ordering::SeqCst),
            },
        );
        self.policy_creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }

    async fn create_policy_version(&self, arn: &str, document: &str) -> Result<()> {
        self.faults.check("iam.create_policy_version")?;
        let mut policies = lock(&self.policies);
        let Some(record) = policies.get_mut(arn) else {
            return Err(ProvisionError::provider(
                "iam.create_policy_version",
                anyhow::anyhow!("NoSuchEntity: policy {arn} not found"),
            ));
        };
        if record.versions.len() >= MAX_POLICY_VERSIONS {
            return Err(ProvisionError::provider(
                "iam.create_policy_version",
                anyhow::anyhow!("LimitExceeded: cannot exceed quota for PolicyVersionsPerPolicy"),
            ));
        }
        let id = format!("v{}", record.next_version);
        record.next_version += 1;
        record.versions.push((id.clone(), document.to_string()));
        record.default_version = id;
        self.version_creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<()> {
        self.faults.check("iam.delete_policy_version")?;
        let mut policies = lock(&self.policies);
        let Some(record) = policies.get_mut(arn) else {
            return Ok(());
        };
        if record.default_version == version_id {
            return Err(ProvisionError::provider(
                "iam.delete_policy_version",
                anyhow::anyhow!("DeleteConflict: cannot delete the default version"),
            ));
        }
        record.versions.retain(|(id, _)| id != version_id);
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIam {
    async fn get_role(&self, name: &str) -> Result<Option<ObservedRole>> {
        self.faults.check("iam.get_role")?;
        let mut roles = lock(&self.roles);
        let Some(record) = roles.get_mut(name) else {
            return Ok(None);
        };
        if record.hidden_reads > 0 {
            record.hidden_reads -= 1;
            return Ok(None);
        }
        Ok(Some(ObservedRole {
            arn: format!("arn:aws:iam::{}:role/{name}", self.account_id),
            trust: parse_trust_policy(&record.trust_policy)?,
            attached_policies: record.attached.clone(),
        }))
    }

    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<CreateOutcome> {
        self.faults.check("iam.create_role")?;
        let mut roles = lock(&self.roles);
        if roles.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        roles.insert(
            name.to_string(),
            RoleRecord {
                trust_policy: trust_policy.to_string(),
                attached: BTreeSet::new(),
                hidden_reads: self.propagation_lag.load(Ordering::SeqCst),
            },
        );
        self.role_creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }

    async fn update_trust_policy(&self, name: &str, trust_policy: &str) -> Result<()> {
        self.faults.check("iam.update_trust_policy")?;
        let mut roles = lock(&self.roles);
        let Some(record) = roles.get_mut(name) else {
            return Err(ProvisionError::provider(
                "iam.update_trust_policy",
                anyhow::anyhow!("NoSuchEntity: role {name} not found"),
            ));
        };
        record.trust_policy = trust_policy.to_string();
        Ok(())
    }

    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.faults.check("iam.attach_policy")?;
        let mut roles = lock(&self.roles);
        let Some(record) = roles.get_mut(role_name) else {
            return Err(ProvisionError::provider(
                "iam.attach_policy",
                anyhow::anyhow!("NoSuchEntity: role {role_name} not found"),
            ));
        };
        record.attached.insert(policy_arn.to_string());
        Ok(())
    }
}

#[async_trait]
impl AccountResolver for MemoryIam {
    async fn account_id(&self) -> Result<String> {
        self.faults.check("sts.get_caller_identity")?;
        Ok(self.account_id.clone())
    }

    async fn oidc_issuer(&self, _cluster: &str) -> Result<String> {
        self.faults.check("eks.describe_cluster")?;
        Ok(format!("https://{}", self.oidc_issuer))
    }
}

/// Behaviour of the simulated sync operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorMode {
    /// Reconciles on every cluster read
    Running,
    /// Never reconciles; statuses stay where they are
    Stalled,
}

#[derive(Debug)]
struct SyncRecord {
    request: SecretSyncRequest,
    managed: bool,
    status: SyncStatus,
    last_refresh: Option<Instant>,
}

#[derive(Debug, Default)]
struct ClusterState {
    service_accounts: BTreeMap<String, Option<String>>,
    stores: BTreeMap<String, (StoreBinding, bool, Readiness)>,
    syncs: BTreeMap<String, SyncRecord>,
    secrets: BTreeMap<String, ClusterSecret>,
    restarts: BTreeMap<String, usize>,
    force_refresh: bool,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Kubernetes API with a simulated External Secrets Operator
#[derive(Debug)]
pub struct MemoryCluster {
    upstream: Arc<MemorySecretStore>,
    state: Mutex<ClusterState>,
    mode: Mutex<OperatorMode>,
    mutations: AtomicUsize,
    pub faults: FaultInjector,
}

impl MemoryCluster {
    pub fn new(upstream: Arc<MemorySecretStore>) -> Self {
        Self {
            upstream,
            state: Mutex::default(),
            mode: Mutex::new(OperatorMode::Running),
            mutations: AtomicUsize::new(0),
            faults: FaultInjector::default(),
        }
    }

    pub fn set_operator(&self, mode: OperatorMode) {
        *lock(&self.mode) = mode;
    }

    /// Refresh every sync request on the next reconcile, as an annotation bump would
    pub fn trigger_refresh(&self) {
        lock(&self.state).force_refresh = true;
    }

    /// Writes issued through [`ClusterApi`]; operator activity is not counted
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn restarts(&self, namespace: &str, name: &str) -> usize {
        lock(&self.state)
            .restarts
            .get(&key(namespace, name))
            .copied()
            .unwrap_or_default()
    }

    pub fn insert_service_account(&self, namespace: &str, name: &str, role_arn: Option<&str>) {
        lock(&self.state)
            .service_accounts
            .insert(key(namespace, name), role_arn.map(str::to_string));
    }

    pub fn insert_store_binding(&self, binding: &StoreBinding, managed: bool) {
        lock(&self.state).stores.insert(
            binding.key(),
            (binding.clone(), managed, Readiness::Unknown),
        );
    }

    pub fn insert_sync_request(&self, request: &SecretSyncRequest, managed: bool) {
        lock(&self.state).syncs.insert(
            request.key(),
            SyncRecord {
                request: request.clone(),
                managed,
                status: SyncStatus::Pending,
                last_refresh: None,
            },
        );
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, secret: ClusterSecret) {
        lock(&self.state).secrets.insert(key(namespace, name), secret);
    }

    /// Value of one key of a cluster secret, as the consumer would read it
    pub fn secret_value(&self, namespace: &str, name: &str, data_key: &str) -> Option<String> {
        lock(&self.state)
            .secrets
            .get(&key(namespace, name))
            .and_then(|secret| secret.data.get(data_key))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn reconcile_operator(&self) {
        if *lock(&self.mode) == OperatorMode::Stalled {
            return;
        }
        let now = Instant::now();
        let mut state = lock(&self.state);
        let ClusterState {
            service_accounts,
            stores,
            syncs,
            secrets,
            force_refresh,
            ..
        } = &mut *state;

        for (binding, _, readiness) in stores.values_mut() {
            let annotated = service_accounts
                .get(&key(&binding.namespace, &binding.service_account))
                .is_some_and(Option::is_some);
            *readiness = if annotated {
                Readiness::Ready
            } else {
                Readiness::NotReady(format!(
                    "service account {} has no role annotation",
                    binding.service_account
                ))
            };
        }

        for record in syncs.values_mut() {
            let request = &record.request;
            let store_ready = stores
                .get(&key(&request.namespace, &request.store_name))
                .is_some_and(|(_, _, readiness)| *readiness == Readiness::Ready);
            if !store_ready {
                record.status = SyncStatus::Error(format!(
                    "SecretStore {} is not ready",
                    request.store_name
                ));
                continue;
            }
            let Some(value) = self.upstream.value(&request.remote_key) else {
                record.status = SyncStatus::Error(format!(
                    "could not get secret data from provider: {} not found",
                    request.remote_key
                ));
                continue;
            };

            let target = key(&request.namespace, &request.target_secret);
            let due = *force_refresh
                || record
                    .last_refresh
                    .is_none_or(|last| now.duration_since(last) >= request.refresh_interval);
            if !secrets.contains_key(&target) || due {
                let secret = secrets.entry(target).or_insert_with(|| ClusterSecret {
                    labels: BTreeMap::from([(
                        "reconcile.external-secrets.io/managed".to_string(),
                        "true".to_string(),
                    )]),
                    owner_references: vec![OwnerReference {
                        api_version: "external-secrets.io/v1".to_string(),
                        kind: "ExternalSecret".to_string(),
                        name: request.target_secret.clone(),
                        controller: Some(true),
                        ..Default::default()
                    }],
                    ..Default::default()
                });
                secret
                    .data
                    .insert(request.target_key.clone(), value.into_bytes());
                record.last_refresh = Some(now);
            }
            record.status = SyncStatus::Synced;
        }
        *force_refresh = false;
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedServiceAccount>> {
        self.faults.check("cluster.get_service_account")?;
        Ok(lock(&self.state)
            .service_accounts
            .get(&key(namespace, name))
            .map(|role_arn| ObservedServiceAccount {
                role_arn: role_arn.clone(),
            }))
    }

    async fn apply_service_account(&self, namespace: &str, name: &str, role_arn: &str) -> Result<()> {
        self.faults.check("cluster.apply_service_account")?;
        lock(&self.state)
            .service_accounts
            .insert(key(namespace, name), Some(role_arn.to_string()));
        self.record_mutation();
        Ok(())
    }

    async fn get_store_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedStoreBinding>> {
        self.faults.check("cluster.get_store_binding")?;
        self.reconcile_operator();
        Ok(lock(&self.state)
            .stores
            .get(&key(namespace, name))
            .map(|(binding, managed, readiness)| ObservedStoreBinding {
                binding: binding.clone(),
                managed: *managed,
                readiness: readiness.clone(),
            }))
    }

    async fn apply_store_binding(&self, binding: &StoreBinding) -> Result<()> {
        self.faults.check("cluster.apply_store_binding")?;
        lock(&self.state)
            .stores
            .entry(binding.key())
            .and_modify(|(existing, managed, _)| {
                *existing = binding.clone();
                *managed = true;
            })
            .or_insert_with(|| (binding.clone(), true, Readiness::Unknown));
        self.record_mutation();
        Ok(())
    }

    async fn get_sync_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedSyncRequest>> {
        self.faults.check("cluster.get_sync_request")?;
        self.reconcile_operator();
        Ok(lock(&self.state)
            .syncs
            .get(&key(namespace, name))
            .map(|record| ObservedSyncRequest {
                request: record.request.clone(),
                managed: record.managed,
                status: record.status.clone(),
            }))
    }

    async fn apply_sync_request(&self, request: &SecretSyncRequest) -> Result<()> {
        self.faults.check("cluster.apply_sync_request")?;
        let mut state = lock(&self.state);
        match state.syncs.get_mut(&request.key()) {
            Some(record) => {
                record.request = request.clone();
                record.managed = true;
            }
            None => {
                state.syncs.insert(
                    request.key(),
                    SyncRecord {
                        request: request.clone(),
                        managed: true,
                        status: SyncStatus::Pending,
                        last_refresh: None,
                    },
                );
            }
        }
        drop(state);
        self.record_mutation();
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<ClusterSecret>> {
        self.faults.check("cluster.get_secret")?;
        self.reconcile_operator();
        Ok(lock(&self.state).secrets.get(&key(namespace, name)).cloned())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.faults.check("cluster.delete_secret")?;
        lock(&self.state).secrets.remove(&key(namespace, name));
        self.record_mutation();
        Ok(())
    }

    async fn restore_secret(&self, namespace: &str, name: &str, secret: &ClusterSecret) -> Result<()> {
        self.faults.check("cluster.restore_secret")?;
        lock(&self.state)
            .secrets
            .insert(key(namespace, name), secret.clone());
        self.record_mutation();
        Ok(())
    }

    async fn restart_workload(&self, namespace: &str, name: &str) -> Result<()> {
        self.faults.check("cluster.restart_workload")?;
        *lock(&self.state)
            .restarts
            .entry(key(namespace, name))
            .or_default() += 1;
        self.record_mutation();
        Ok(())
    }
}

/// One fake cloud account plus cluster, wired together
#[derive(Debug, Clone)]
pub struct MemoryCloud {
    pub secrets: Arc<MemorySecretStore>,
    pub iam: Arc<MemoryIam>,
    pub cluster: Arc<MemoryCluster>,
}

impl MemoryCloud {
    pub fn new(account_id: &str, oidc_issuer: &str) -> Self {
        let secrets = Arc::new(MemorySecretStore::new());
        Self {
            iam: Arc::new(MemoryIam::new(account_id, oidc_issuer)),
            cluster: Arc::new(MemoryCluster::new(Arc::clone(&secrets))),
            secrets,
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            secrets: Arc::clone(&self.secrets) as Arc<dyn SecretStoreProvider>,
            policies: Arc::clone(&self.iam) as Arc<dyn PolicyProvider>,
            identities: Arc::clone(&self.iam) as Arc<dyn IdentityProvider>,
            cluster: Arc::clone(&self.cluster) as Arc<dyn ClusterApi>,
        }
    }
}
