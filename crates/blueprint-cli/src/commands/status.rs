//! Status command - Operator, helm controller and addon health

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Api;
use serde_json::Value;

use blueprint_common::client::create_client;
use blueprint_common::{BLUEPRINT_NAMESPACE, OPERATOR_DEPLOYMENT};

use super::{context_of, Context};
use crate::Result;

const HELM_CONTROLLER_NAMESPACE: &str = "flux-system";
const HELM_CONTROLLER_DEPLOYMENT: &str = "helm-controller";

pub async fn run(ctx: &Context) -> Result<()> {
    let provider = ctx.provider()?;
    let client = create_client(&ctx.kubeconfig, context_of(provider.as_ref()).as_deref()).await?;

    let operator = Api::<Deployment>::namespaced(client.clone(), BLUEPRINT_NAMESPACE)
        .get_opt(OPERATOR_DEPLOYMENT)
        .await
        .map_err(blueprint_common::Error::from)?;
    let helm = Api::<Deployment>::namespaced(client.clone(), HELM_CONTROLLER_NAMESPACE)
        .get_opt(HELM_CONTROLLER_DEPLOYMENT)
        .await
        .map_err(blueprint_common::Error::from)?;

    let addons: Api<DynamicObject> =
        Api::namespaced_with(client, BLUEPRINT_NAMESPACE, &addon_resource());
    let list = addons
        .list(&ListParams::default())
        .await
        .map_err(blueprint_common::Error::from)?;

    print!("{}", render(operator.as_ref(), helm.as_ref(), &list.items));
    Ok(())
}

/// The full status report
fn render(operator: Option<&Deployment>, helm: Option<&Deployment>, addons: &[DynamicObject]) -> String {
    let mut out = String::new();
    out.push_str(&deployment_line(
        "Blueprint operator",
        operator,
        "No blueprint operator installation detected",
    ));
    out.push('\n');
    out.push_str(&deployment_line(
        "Helm controller",
        helm,
        "No helm controller detected - Chart addons may not function",
    ));
    out.push_str("\n\n");
    out.push_str(&addon_table(addons));
    out
}

fn addon_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "blueprint.mirantis.com",
        "v1alpha1",
        "Addon",
    ))
}

fn deployment_line(label: &str, deployment: Option<&Deployment>, missing: &str) -> String {
    let Some(deployment) = deployment else {
        return missing.to_string();
    };

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let state = if ready >= desired { "Ready" } else { "NotReady" };
    format!("{}: {} ({}/{} replicas)", label, state, ready, desired)
}

fn addon_table(addons: &[DynamicObject]) -> String {
    if addons.is_empty() {
        return "No addons installed\n".to_string();
    }

    let mut out = format!(
        "{:<20} {:<10} {:<20} {:<10}\n",
        "NAME", "KIND", "NAMESPACE", "STATUS"
    );
    out.push_str(&format!("{:-<20} {:-<10} {:-<20} {:-<10}\n", "", "", "", ""));
    for addon in addons {
        let name = addon.metadata.name.as_deref().unwrap_or_default();
        let kind = field(&addon.data, &["spec", "kind"]);
        let namespace = field(&addon.data, &["spec", "namespace"]);
        let status = field(&addon.data, &["status", "type"]);
        out.push_str(&format!(
            "{:<20} {:<10} {:<20} {:<10}\n",
            name, kind, namespace, status
        ));
    }
    out
}

fn field<'a>(data: &'a Value, path: &[&str]) -> &'a str {
    path.iter()
        .try_fold(data, |value, key| value.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addon(name: &str, kind: &str, namespace: &str, status: Option<&str>) -> DynamicObject {
        let mut data = json!({ "spec": { "kind": kind, "namespace": namespace } });
        if let Some(status) = status {
            data["status"] = json!({ "type": status });
        }
        let mut obj = DynamicObject::new(name, &addon_resource()).within(BLUEPRINT_NAMESPACE);
        obj.data = data;
        obj
    }

    fn deployment(replicas: i32, ready: i32) -> Deployment {
        serde_json::from_value(json!({
            "metadata": { "name": OPERATOR_DEPLOYMENT },
            "spec": {
                "replicas": replicas,
                "selector": {},
                "template": {}
            },
            "status": { "readyReplicas": ready }
        }))
        .expect("valid deployment")
    }

    fn columns(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    #[test]
    fn empty_addon_list_says_so() {
        assert_eq!(addon_table(&[]), "No addons installed\n");
    }

    #[test]
    fn addon_table_lists_kind_namespace_and_status() {
        let table = addon_table(&[
            addon("nginx", "chart", "web", Some("Available")),
            addon("metallb", "manifest", "metallb-system", None),
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(columns(lines[0]), ["NAME", "KIND", "NAMESPACE", "STATUS"]);
        assert!(lines[1].chars().all(|c| c == '-' || c == ' '));
        assert_eq!(columns(lines[2]), ["nginx", "chart", "web", "Available"]);
        assert_eq!(columns(lines[3]), ["metallb", "manifest", "metallb-system"]);
    }

    #[test]
    fn report_shows_controllers_then_addons() {
        let operator = deployment(1, 1);
        let report = render(
            Some(&operator),
            None,
            &[addon("nginx", "chart", "default", Some("Progressing"))],
        );
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines[0], "Blueprint operator: Ready (1/1 replicas)");
        assert_eq!(
            lines[1],
            "No helm controller detected - Chart addons may not function"
        );
        assert_eq!(lines[2], "");
        assert_eq!(columns(lines[3]), ["NAME", "KIND", "NAMESPACE", "STATUS"]);
        assert_eq!(columns(lines[5]), ["nginx", "chart", "default", "Progressing"]);
    }

    #[test]
    fn report_without_anything_installed() {
        let report = render(None, None, &[]);
        assert_eq!(
            report,
            "No blueprint operator installation detected\n\
             No helm controller detected - Chart addons may not function\n\
             \n\
             No addons installed\n"
        );
    }

    #[test]
    fn deployment_readiness_counts_replicas() {
        assert_eq!(
            deployment_line("Operator", Some(&deployment(2, 1)), "missing"),
            "Operator: NotReady (1/2 replicas)"
        );
        assert_eq!(deployment_line("Operator", None, "missing"), "missing");
    }
}
