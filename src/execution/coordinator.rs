//! Pipeline coordinator - runs the five stages in order

use crate::{
    cloud::{persist_private_key, CloudProvider, Reconciler, RegistryApi},
    core::{
        config::DeployConfig, CommandRenderer, ContextKey, DeployError, ExecutionStatus,
        HostRegistry, PipelineContext, PipelineState, ProvisionedHost, ResourceDescriptor,
        ResourceSpec, Stage, StageError, BASE_GROUP, BUILD_GROUP, RUN_GROUP,
    },
    credentials::CredentialBroker,
    execution::stages,
    remote::{executor::HostStep, HostResults, RemoteExecutor, SessionFactory},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a deployment run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        name: String,
    },
    StageStarted {
        stage: Stage,
    },
    ResourceReady {
        label: String,
        id: String,
        created: bool,
        drift: Vec<String>,
    },
    HostFailed {
        stage: Stage,
        host: String,
        error: String,
    },
    StagePassed {
        stage: Stage,
        outputs: Vec<(ContextKey, String)>,
    },
    StageFailed {
        stage: Stage,
        error: String,
    },
    StageSkipped {
        stage: Stage,
        reason: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Everything one run accumulates
#[derive(Debug)]
pub struct Deployment {
    pub name: String,
    pub state: PipelineState,
    pub context: PipelineContext,
    pub hosts: HostRegistry,
    pub resources: Vec<ResourceDescriptor>,
}

impl Deployment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PipelineState::new(),
            context: PipelineContext::new(),
            hosts: HostRegistry::new(),
            resources: Vec::new(),
        }
    }

    /// Service URL, once Deploy has passed
    pub fn service_url(&self) -> Option<&str> {
        self.context.get(ContextKey::ServiceUrl)
    }
}

/// Sequences Provision, Prepare, Build, Publish and Deploy
pub struct Coordinator {
    config: Arc<DeployConfig>,
    reconciler: Reconciler,
    registry: Arc<dyn RegistryApi>,
    broker: Arc<CredentialBroker>,
    executor: RemoteExecutor,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl Coordinator {
    pub fn new(
        config: DeployConfig,
        cloud: Arc<dyn CloudProvider>,
        registry: Arc<dyn RegistryApi>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        let renderer = CommandRenderer::new(
            config.runtime.sudo,
            config.runtime.binary.clone(),
            config.runtime.package_manager,
        );
        let executor = RemoteExecutor::new(sessions, renderer).with_parallelism(config.parallelism);

        Self {
            reconciler: Reconciler::new(cloud, config.polling.clone()),
            broker: Arc::new(CredentialBroker::new(registry.clone())),
            registry,
            executor,
            config: Arc::new(config),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute every stage; the first failing stage ends the run
    pub async fn execute(&self, deployment: &mut Deployment) -> Result<(), StageError> {
        let execution_id = deployment.state.execution_id;
        info!("Starting deployment: {} ({})", deployment.name, execution_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            name: deployment.name.clone(),
        })
        .await;

        for stage in Stage::ALL {
            if let Err(e) = self.execute_stage(deployment, stage).await {
                error!("{} failed: {}", stage, e);
                deployment.state.fail_stage(stage, e.to_string());
                self.emit_event(ExecutionEvent::StageFailed {
                    stage,
                    error: e.to_string(),
                })
                .await;

                let mut next = stage.next();
                while let Some(later) = next {
                    self.emit_event(ExecutionEvent::StageSkipped {
                        stage: later,
                        reason: format!("{} failed", stage),
                    })
                    .await;
                    next = later.next();
                }

                self.emit_event(ExecutionEvent::PipelineCompleted {
                    execution_id,
                    status: deployment.state.status,
                })
                .await;
                return Err(StageError::new(stage, e));
            }
        }

        info!("Deployment finished: {}", deployment.name);
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            status: deployment.state.status,
        })
        .await;
        Ok(())
    }

    async fn execute_stage(&self, deployment: &mut Deployment, stage: Stage) -> Result<(), DeployError> {
        deployment
            .context
            .check_inputs(stage, stages::inputs(stage))?;

        deployment.state.start_stage(stage);
        self.emit_event(ExecutionEvent::StageStarted { stage }).await;

        match stage {
            Stage::Provision => self.provision(deployment).await?,
            Stage::Prepare => self.prepare(deployment).await?,
            Stage::Build => self.build(deployment).await?,
            Stage::Publish => self.publish(deployment).await?,
            Stage::Deploy => self.deploy(deployment).await?,
        }

        deployment.state.pass_stage(stage);
        let outputs = stages::outputs(stage)
            .iter()
            .filter_map(|key| deployment.context.get(*key).map(|v| (*key, v.to_string())))
            .collect();
        self.emit_event(ExecutionEvent::StagePassed { stage, outputs }).await;
        Ok(())
    }

    async fn ensure(
        &self,
        deployment: &mut Deployment,
        spec: &ResourceSpec,
    ) -> Result<ResourceDescriptor, DeployError> {
        let descriptor = self.reconciler.ensure(spec).await?;
        self.emit_event(ExecutionEvent::ResourceReady {
            label: spec.label(),
            id: descriptor.id.clone(),
            created: descriptor.created,
            drift: descriptor.drift.clone(),
        })
        .await;
        // Key material stays with the caller that persists it
        deployment.resources.push(ResourceDescriptor {
            private_key: None,
            ..descriptor.clone()
        });
        Ok(descriptor)
    }

    async fn provision(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        let config = &self.config;

        let key_spec = ResourceSpec::key_pair(&config.key_pair.name);
        let key_path = config.key_path();
        let key_pair = self.ensure(deployment, &key_spec).await?;
        match &key_pair.private_key {
            Some(private_key) => {
                persist_private_key(&key_path, private_key)?;
                info!("Saved private key to {}", key_path.display());
            }
            None if !key_path.exists() => {
                return Err(DeployError::Provisioning {
                    resource: key_spec.label(),
                    message: format!(
                        "key pair exists but its private key is not at {}",
                        key_path.display()
                    ),
                });
            }
            None => {}
        }

        for spec in config.firewall_specs() {
            self.ensure(deployment, &spec).await?;
        }

        for (spec, instance) in config.instance_specs().iter().zip(&config.instances) {
            let descriptor = self.ensure(deployment, spec).await?;
            let address = descriptor
                .public_address
                .clone()
                .ok_or_else(|| DeployError::Provisioning {
                    resource: spec.label(),
                    message: "running without a public address".to_string(),
                })?;

            let host = ProvisionedHost {
                name: instance.name.clone(),
                address,
                role: instance.role,
                user: config.ssh.user.clone(),
                key_path: key_path.clone(),
            };
            deployment.hosts.register(instance.role.group(), host.clone());
            deployment.hosts.register(BASE_GROUP, host);
        }

        let repository = &config.registry.repository;
        let repository_error = |e: crate::cloud::CloudError| DeployError::Provisioning {
            resource: format!("registry repository '{}'", repository),
            message: e.to_string(),
        };
        let registry_uri = match self
            .registry
            .find_repository(repository)
            .await
            .map_err(repository_error)?
        {
            Some(uri) => uri,
            None => {
                info!("Creating registry repository '{}'", repository);
                self.registry
                    .create_repository(repository)
                    .await
                    .map_err(repository_error)?
            }
        };

        // Cached for Publish and Deploy; never written to the context
        self.broker.authenticate(&registry_uri).await?;

        let image_ref = stages::image_ref(&registry_uri, &config.registry.tag);
        deployment
            .context
            .set(Stage::Provision, ContextKey::RegistryUri, registry_uri)?;
        deployment
            .context
            .set(Stage::Provision, ContextKey::ImageRef, image_ref)?;
        Ok(())
    }

    async fn prepare(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        let hosts = deployment.hosts.group(BASE_GROUP).to_vec();
        if hosts.is_empty() {
            return Err(DeployError::Context(format!(
                "no hosts registered in group '{}'",
                BASE_GROUP
            )));
        }

        let steps = to_steps(stages::prepare_operations(&self.config));
        let results = self.executor.run(&hosts, &steps).await;

        for (host, e) in results.failures() {
            warn!("Excluding {} from later stages: {}", host, e);
            deployment.hosts.exclude(host);
            deployment
                .state
                .record_host_failure(Stage::Prepare, host.to_string(), e.to_string());
            self.emit_event(ExecutionEvent::HostFailed {
                stage: Stage::Prepare,
                host: host.to_string(),
                error: e.to_string(),
            })
            .await;
        }

        let prepared = results.succeeded();
        if prepared.is_empty() {
            return Err(results
                .first_error()
                .cloned()
                .unwrap_or_else(|| DeployError::Context("no host was prepared".to_string())));
        }

        deployment
            .context
            .set(Stage::Prepare, ContextKey::PreparedHosts, prepared.join(","))?;
        Ok(())
    }

    async fn build(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        let image_ref = deployment
            .context
            .require(Stage::Build, ContextKey::ImageRef)?
            .to_string();
        let hosts = deployment.hosts.group(BUILD_GROUP).to_vec();
        if hosts.is_empty() {
            return Err(DeployError::Build("no build host available".to_string()));
        }

        let steps = to_steps(stages::build_operations(&self.config, &image_ref));
        let results = self.executor.run(&hosts, &steps).await;
        first_failure(&results, DeployError::Build)?;

        deployment.context.set(
            Stage::Build,
            ContextKey::ArtifactPath,
            self.config.checkout_path(&self.config.app.artifact),
        )?;
        Ok(())
    }

    async fn publish(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        let registry_uri = deployment
            .context
            .require(Stage::Publish, ContextKey::RegistryUri)?
            .to_string();
        let image_ref = deployment
            .context
            .require(Stage::Publish, ContextKey::ImageRef)?
            .to_string();
        let hosts = deployment.hosts.group(BUILD_GROUP).to_vec();
        if hosts.is_empty() {
            return Err(DeployError::Publish("no build host available".to_string()));
        }

        let token = self.broker.authenticate(&registry_uri).await?;
        let mut steps = vec![HostStep::RegistryLogin {
            broker: self.broker.clone(),
            registry_uri,
            token,
        }];
        steps.extend(to_steps(stages::publish_operations(&image_ref)));

        let results = self.executor.run(&hosts, &steps).await;
        first_failure(&results, DeployError::Publish)?;

        deployment
            .context
            .set(Stage::Publish, ContextKey::PublishedImage, image_ref)?;
        Ok(())
    }

    async fn deploy(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        let registry_uri = deployment
            .context
            .require(Stage::Deploy, ContextKey::RegistryUri)?
            .to_string();
        let image = deployment
            .context
            .require(Stage::Deploy, ContextKey::PublishedImage)?
            .to_string();
        let hosts = deployment.hosts.group(RUN_GROUP).to_vec();
        let first_host = hosts
            .first()
            .ok_or_else(|| DeployError::Deploy("no run host available".to_string()))?;

        let token = self.broker.authenticate(&registry_uri).await?;
        let mut steps = to_steps(stages::deploy_cleanup_operations(&self.config, &image));
        steps.push(HostStep::RegistryLogin {
            broker: self.broker.clone(),
            registry_uri,
            token,
        });
        steps.push(stages::deploy_run_operation(&self.config, &image).into());

        let results = self.executor.run(&hosts, &steps).await;
        first_failure(&results, DeployError::Deploy)?;

        let url = stages::service_url(&self.config, &first_host.address)
            .ok_or_else(|| DeployError::Deploy("service exposes no ports".to_string()))?;
        info!("Service available at {}", url);
        deployment.context.set(Stage::Deploy, ContextKey::ServiceUrl, url)?;
        Ok(())
    }
}

fn to_steps(operations: Vec<crate::core::PlannedOperation>) -> Vec<HostStep> {
    operations.into_iter().map(HostStep::from).collect()
}

/// Stage-level error for the first failing host
fn first_failure(results: &HostResults, wrap: fn(String) -> DeployError) -> Result<(), DeployError> {
    match results.first_error() {
        Some(e) => Err(wrap(e.to_string())),
        None => Ok(()),
    }
}
