//! Stage wiring: declared inputs, outputs, target groups and operation lists

use crate::core::{
    config::DeployConfig, shell_quote, CommandRenderer, ContextKey, Operation, PlannedOperation,
    Stage, BASE_GROUP, BUILD_GROUP, RUN_GROUP,
};
use serde::Serialize;

/// Context keys a stage needs before it may start
pub fn inputs(stage: Stage) -> &'static [ContextKey] {
    match stage {
        Stage::Provision | Stage::Prepare => &[],
        Stage::Build => &[ContextKey::ImageRef],
        Stage::Publish => &[ContextKey::RegistryUri, ContextKey::ImageRef],
        Stage::Deploy => &[ContextKey::RegistryUri, ContextKey::PublishedImage],
    }
}

/// Context keys a stage writes on success
pub fn outputs(stage: Stage) -> &'static [ContextKey] {
    match stage {
        Stage::Provision => &[ContextKey::RegistryUri, ContextKey::ImageRef],
        Stage::Prepare => &[ContextKey::PreparedHosts],
        Stage::Build => &[ContextKey::ArtifactPath],
        Stage::Publish => &[ContextKey::PublishedImage],
        Stage::Deploy => &[ContextKey::ServiceUrl],
    }
}

/// Host group a stage operates on; Provision touches no hosts
pub fn target_group(stage: Stage) -> Option<&'static str> {
    match stage {
        Stage::Provision => None,
        Stage::Prepare => Some(BASE_GROUP),
        Stage::Build | Stage::Publish => Some(BUILD_GROUP),
        Stage::Deploy => Some(RUN_GROUP),
    }
}

/// Image reference pushed to and pulled from the registry
pub fn image_ref(registry_uri: &str, tag: &str) -> String {
    format!("{}:{}", registry_uri, tag)
}

/// Container runtime install and start
pub fn prepare_operations(config: &DeployConfig) -> Vec<PlannedOperation> {
    vec![
        PlannedOperation::new(
            "install-runtime",
            Operation::EnsurePackageInstalled {
                package: config.runtime.package.clone(),
            },
        ),
        PlannedOperation::new(
            "start-runtime",
            Operation::EnsureServiceRunning {
                service: config.runtime.service.clone(),
            },
        ),
    ]
}

/// Shell script run in the git image to check out `version` into the mount
fn fetch_script(repository: &str, version: &str) -> String {
    format!(
        "git config --global --add safe.directory /workspace && \
         {{ [ -d .git ] || {{ git init -q . && git remote add origin {repo}; }}; }} && \
         git remote set-url origin {repo} && \
         git fetch -q --depth 1 origin {version} && \
         git checkout -q -f FETCH_HEAD",
        repo = shell_quote(repository),
        version = shell_quote(version),
    )
}

/// Fetch, edit, compile, verify, then build the service image
pub fn build_operations(config: &DeployConfig, image_ref: &str) -> Vec<PlannedOperation> {
    let app = &config.app;
    let checkout = app.checkout_dir.clone();
    let artifact = shell_quote(&app.artifact);
    let mut operations = vec![PlannedOperation::new(
        "fetch-source",
        Operation::RunContainerizedCommand {
            image: app.git_image.clone(),
            host_dir: checkout.clone(),
            command: fetch_script(&app.repository, &app.version),
        },
    )];

    if let Some(edit) = &app.edit {
        operations.push(PlannedOperation::new(
            "edit-config",
            Operation::EditTextInPlace {
                path: config.checkout_path(&edit.file),
                pattern: edit.pattern.clone(),
                line: edit.line.clone(),
            },
        ));
    }

    operations.extend([
        PlannedOperation::new(
            "remove-stale-artifact",
            Operation::RunContainerizedCommand {
                image: app.build_image.clone(),
                host_dir: checkout.clone(),
                command: format!("rm -f {}", artifact),
            },
        ),
        PlannedOperation::new(
            "build-artifact",
            Operation::RunContainerizedCommand {
                image: app.build_image.clone(),
                host_dir: checkout.clone(),
                command: app.build_command.clone(),
            },
        ),
        PlannedOperation::new(
            "verify-artifact",
            Operation::RunContainerizedCommand {
                image: app.build_image.clone(),
                host_dir: checkout,
                command: format!("test -f {}", artifact),
            },
        ),
        PlannedOperation::new(
            "build-image",
            Operation::BuildContainerImage {
                context_dir: config.checkout_path(&app.context),
                tag: image_ref.to_string(),
                build_args: app
                    .build_args
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
        ),
    ]);

    operations
}

/// Push after the registry login step
pub fn publish_operations(image_ref: &str) -> Vec<PlannedOperation> {
    vec![PlannedOperation::new(
        "push-image",
        Operation::PushContainerImage {
            image: image_ref.to_string(),
        },
    )]
}

/// Operations run before the registry login on each run host
pub fn deploy_cleanup_operations(config: &DeployConfig, image: &str) -> Vec<PlannedOperation> {
    vec![
        PlannedOperation::new(
            "remove-container",
            Operation::RemoveContainer {
                name: config.service.container_name.clone(),
            },
        ),
        PlannedOperation::new(
            "remove-image",
            Operation::RemoveImage {
                image: image.to_string(),
            },
        ),
    ]
}

/// Container start, run after the registry login
pub fn deploy_run_operation(config: &DeployConfig, image: &str) -> PlannedOperation {
    PlannedOperation::new(
        "run-container",
        Operation::RunContainer {
            name: config.service.container_name.clone(),
            image: image.to_string(),
            ports: config.service.ports.clone(),
        },
    )
}

/// URL the deployed service answers on
pub fn service_url(config: &DeployConfig, address: &str) -> Option<String> {
    let port = config.service.ports.first()?;
    let path = if config.service.path.starts_with('/') {
        config.service.path.clone()
    } else {
        format!("/{}", config.service.path)
    };
    Some(format!("http://{}:{}{}", address, port.host, path))
}

/// One step of a dry-run listing
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub label: String,
    pub kind: String,
    /// Shell form, when the step is a single command
    pub command: Option<String>,
}

/// What a stage would do, without touching anything
#[derive(Debug, Clone, Serialize)]
pub struct StagePlan {
    pub stage: Stage,
    pub group: Option<String>,
    pub steps: Vec<PlannedStep>,
}

/// Placeholder used where the plan needs the registry URI
const REGISTRY_PLACEHOLDER: &str = "<registry>";

/// Every stage's steps in execution order
pub fn plan(config: &DeployConfig) -> Vec<StagePlan> {
    let renderer = CommandRenderer::new(
        config.runtime.sudo,
        config.runtime.binary.clone(),
        config.runtime.package_manager,
    );
    let registry_uri = format!("{}/{}", REGISTRY_PLACEHOLDER, config.registry.repository);
    let image = image_ref(&registry_uri, &config.registry.tag);

    let planned = |op: PlannedOperation| PlannedStep {
        command: renderer.render(&op.operation),
        kind: op.operation.kind().to_string(),
        label: op.label,
    };
    let login = || PlannedStep {
        label: "registry-login".to_string(),
        kind: "registry-login".to_string(),
        command: Some(format!(
            "{} login --username <token user> --password-stdin {}",
            renderer.docker(),
            REGISTRY_PLACEHOLDER
        )),
    };

    let mut provision: Vec<PlannedStep> = vec![PlannedStep {
        label: format!("key pair '{}'", config.key_pair.name),
        kind: "ensure-resource".to_string(),
        command: None,
    }];
    provision.extend(
        config
            .firewall_specs()
            .into_iter()
            .chain(config.instance_specs())
            .map(|spec| PlannedStep {
                label: spec.label(),
                kind: "ensure-resource".to_string(),
                command: None,
            }),
    );
    provision.push(PlannedStep {
        label: format!("registry repository '{}'", config.registry.repository),
        kind: "ensure-resource".to_string(),
        command: None,
    });

    let mut publish = vec![login()];
    publish.extend(publish_operations(&image).into_iter().map(planned));

    let mut deploy: Vec<PlannedStep> = deploy_cleanup_operations(config, &image)
        .into_iter()
        .map(planned)
        .collect();
    deploy.push(login());
    deploy.push(planned(deploy_run_operation(config, &image)));

    let steps = [
        provision,
        prepare_operations(config).into_iter().map(planned).collect(),
        build_operations(config, &image).into_iter().map(planned).collect(),
        publish,
        deploy,
    ];

    Stage::ALL
        .into_iter()
        .zip(steps)
        .map(|(stage, steps)| StagePlan {
            stage,
            group: target_group(stage).map(str::to_string),
            steps,
        })
        .collect()
}
