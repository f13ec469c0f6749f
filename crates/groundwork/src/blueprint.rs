//! Built-in web-service topologies
//!
//! Three variants of the same application stack: a container behind a
//! managed load-balanced service, the same with a log-tailing sidecar, and
//! an EC2-style variant where the instance capacity and load balancer are
//! wired by hand. They share one stack name on purpose — switching variants
//! plans a migration of the same stack, not a second deployment.

use clap::ValueEnum;
use groundwork_cloud::UpdatePolicy;
use groundwork_core::{AttrValue, ResourceDescriptor, Stack};
use std::collections::BTreeMap;

const APP: &str = "webapp";
const DOMAIN: &str = "webapp.example.com";
const CERT_ARN: &str = "arn:sim:acm/webapp-cert";

/// Which topology variant to declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Blueprint {
    /// Load-balanced container service on managed capacity
    FargateLb,
    /// Same, plus a log-tailing sidecar container
    FargateLbSidecar,
    /// Self-managed instance capacity behind a hand-wired load balancer
    Ec2Cluster,
}

impl Blueprint {
    pub fn stack(&self, name: impl Into<String>) -> Stack {
        match self {
            Blueprint::FargateLb => fargate_lb(name, false),
            Blueprint::FargateLbSidecar => fargate_lb(name, true),
            Blueprint::Ec2Cluster => ec2_cluster(name),
        }
    }
}

/// Replacement rules for the web-service resource types: identity-bearing
/// attributes cannot change in place on the simulated remote, same as on a
/// real one.
pub fn update_policy() -> UpdatePolicy {
    UpdatePolicy::new()
        .replace_on("container-registry", ["name"])
        .replace_on("network", ["name", "max_azs"])
        .replace_on("cluster", ["name", "network_id", "capacity"])
        .replace_on("task-definition", ["family"])
        .replace_on("certificate", ["arn"])
        .replace_on("hosted-zone", ["zone_name"])
        .replace_on("load-balanced-service", ["name", "cluster_id"])
        .replace_on("load-balancer", ["name", "network_id"])
}

fn map<const N: usize>(entries: [(&str, AttrValue); N]) -> AttrValue {
    AttrValue::Map(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn list<const N: usize>(items: [AttrValue; N]) -> AttrValue {
    AttrValue::List(items.into())
}

fn strings<const N: usize>(items: [&str; N]) -> AttrValue {
    AttrValue::List(items.iter().map(|item| AttrValue::from(*item)).collect())
}

fn app_container(sidecar: bool) -> AttrValue {
    let main = map([
        ("name", AttrValue::from(format!("{APP}-container"))),
        ("image", AttrValue::from("sample/webapp-api")),
        ("port", AttrValue::from(80)),
        ("log_group", AttrValue::reference("log-group", "name")),
        ("stream_prefix", AttrValue::from(APP)),
    ]);
    if !sidecar {
        return list([main]);
    }
    // Tails the application's own log file next to the main container.
    let tailer = map([
        ("name", AttrValue::from("log-tailer")),
        ("image", AttrValue::from("busybox")),
        (
            "command",
            strings(["tail", "-n+1", "-F", "/var/log/webapp/combined.log"]),
        ),
        ("log_group", AttrValue::reference("log-group", "name")),
        ("stream_prefix", AttrValue::from(format!("{APP}-app-logs"))),
    ]);
    list([main, tailer])
}

/// Registry, network, logging, execution role and a load-balanced service
/// with TLS termination and DNS wiring
fn fargate_lb(name: impl Into<String>, sidecar: bool) -> Stack {
    let mut stack = Stack::new(name);

    stack
        .add(
            ResourceDescriptor::new("repository", "container-registry")
                .attr("name", format!("{APP}-repository")),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("network", "network")
                .attr("name", format!("{APP}-vpc"))
                .attr("max_azs", 2),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("log-group", "log-group")
                .attr("name", format!("{APP}-log-group"))
                .attr("retention_days", 7),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("execution-role", "role")
                .attr("name", format!("{APP}-execution-role"))
                .attr("description", format!("Task execution role for {APP}"))
                .attr("assumed_by", "tasks.sim.internal")
                .attr(
                    "actions",
                    strings([
                        "registry:get-authorization-token",
                        "registry:batch-check-layer-availability",
                        "registry:get-download-url-for-layer",
                        "registry:batch-get-image",
                        "logs:create-log-stream",
                        "logs:put-log-events",
                    ]),
                ),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("cluster", "cluster")
                .attr("name", format!("{APP}-cluster"))
                .attr_ref("network_id", "network", "id"),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("task-definition", "task-definition")
                .attr("family", format!("{APP}-task-definition"))
                .attr("memory_mib", 512)
                .attr_ref("execution_role_arn", "execution-role", "arn")
                .attr("containers", app_container(sidecar)),
        )
        .expect("blueprint ids are unique");
    stack
        .add(ResourceDescriptor::new("certificate", "certificate").attr("arn", CERT_ARN))
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("zone", "hosted-zone").attr("zone_name", DOMAIN),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("service", "load-balanced-service")
                .attr("name", format!("{APP}-api-service"))
                .attr("load_balancer_name", format!("{APP}-alb"))
                .attr_ref("cluster_id", "cluster", "id")
                .attr_ref("task_definition_arn", "task-definition", "arn")
                .attr("desired_count", 1)
                .attr("listener_port", 443)
                .attr("protocol", "HTTPS")
                .attr("target_protocol", "HTTP")
                .attr_ref("certificate_arn", "certificate", "arn")
                .attr("health_check_path", "/healthcheck")
                .depends_on("repository"),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("endpoint", "dns-record")
                .attr("record_name", DOMAIN)
                .attr_ref("zone_id", "zone", "id")
                .attr_ref("target", "service", "dns_name"),
        )
        .expect("blueprint ids are unique");

    stack.export("endpoint_address", "service", "dns_name");
    stack
}

/// EC2-style variant: the cluster brings its own autoscaled instances and
/// the load balancer, listener and target group are declared explicitly
fn ec2_cluster(name: impl Into<String>) -> Stack {
    let mut stack = Stack::new(name);

    stack
        .add(
            ResourceDescriptor::new("repository", "container-registry")
                .attr("name", format!("{APP}-repository")),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("network", "network")
                .attr("name", format!("{APP}-vpc"))
                .attr("max_azs", 2),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("cluster", "cluster")
                .attr("name", format!("{APP}-cluster"))
                .attr_ref("network_id", "network", "id")
                .attr(
                    "capacity",
                    map([
                        ("autoscaling_group", AttrValue::from(format!("{APP}-asg"))),
                        ("instance_type", AttrValue::from("t2.micro")),
                    ]),
                ),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("task-definition", "task-definition")
                .attr("family", format!("{APP}-taskdefinition"))
                .attr(
                    "containers",
                    list([map([
                        ("name", AttrValue::from(format!("{APP}-container"))),
                        ("image", AttrValue::from("sample/webapp-api")),
                        ("memory_mib", AttrValue::from(512)),
                        ("stream_prefix", AttrValue::from(APP)),
                        (
                            "port_mappings",
                            list([map([
                                ("container_port", AttrValue::from(80)),
                                ("host_port", AttrValue::from(80)),
                                ("protocol", AttrValue::from("tcp")),
                            ])]),
                        ),
                    ])]),
                ),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("service", "service")
                .attr("name", format!("{APP}-api-service"))
                .attr_ref("cluster_id", "cluster", "id")
                .attr_ref("task_definition_arn", "task-definition", "arn")
                .depends_on("repository"),
        )
        .expect("blueprint ids are unique");
    stack
        .add(
            ResourceDescriptor::new("load-balancer", "load-balancer")
                .attr("name", format!("{APP}-alb"))
                .attr("internet_facing", true)
                .attr_ref("network_id", "network", "id")
                .attr(
                    "listener",
                    map([
                        ("port", AttrValue::from(443)),
                        ("certificate_arn", AttrValue::from(CERT_ARN)),
                        ("redirect_http_to_https", AttrValue::from(true)),
                    ]),
                )
                .attr(
                    "target",
                    map([
                        ("target_group", AttrValue::from(format!("{APP}-tg"))),
                        ("service_id", AttrValue::reference("service", "id")),
                        ("port", AttrValue::from(80)),
                        (
                            "health_check",
                            map([
                                ("path", AttrValue::from("/health")),
                                ("interval_secs", AttrValue::from(60)),
                                ("timeout_secs", AttrValue::from(5)),
                            ]),
                        ),
                    ]),
                ),
        )
        .expect("blueprint ids are unique");

    stack.export("endpoint_address", "load-balancer", "dns_name");
    stack
}
