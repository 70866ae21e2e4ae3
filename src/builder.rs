//! Stack builder - declares the whole Kaginawa infrastructure
//!
//! Producers are declared before their consumers so every handle exists when
//! it is needed; emission order is still decided by the dependency graph at
//! synthesis time.

use crate::config::{self, StackConfig};
use crate::resource::{
    Attribute, Certificate, Cluster, ElasticIp, GlobalSecondaryIndex, HttpsListener, Instance,
    InstanceType, LoadBalancedFargateService, MachineImage, Network, NetworkHandle,
    PolicyStatement, Role, Scaling, Stickiness, SubnetConfiguration, SubnetType, Table,
    TableHandle,
};
use anyhow::{Context, Result, bail};
use declarative::{Construct, Expr, RemovalPolicy, Stack};

pub const DEFAULT_STACK_NAME: &str = "KaginawaCdkStack";

pub const CUSTOM_ID_INDEX: &str = "CustomID-index";

/// Most relays that fit within [`declarative::MAX_TEMPLATE_RESOURCES`]
pub const MAX_SSH_SERVERS: usize = 64;

const LOGS_TTL_DAYS: u32 = 90;
const SESSIONS_TTL_DAYS: u32 = 180;

/// Debian 10 arm64 images for the SSH relays
const SSH_INSTANCE_AMIS: [(&str, &str); 1] = [("ap-northeast-1", "ami-0ed400c2ea06a311c")];

const TABLE_SCALING: Scaling = Scaling {
    min_capacity: 1,
    max_capacity: 100,
    target_utilization: 80.0,
};

/// Declare one construct, logging it and naming it in any error
fn declare<C: Construct>(stack: &mut Stack, construct: &C) -> Result<C::Handle> {
    log::debug!("{}", construct.description());
    construct
        .declare(stack)
        .with_context(|| format!("Failed to declare {}", construct.id()))
}

/// The five tables of the server, in the order the environment lists them
struct Tables {
    keys: TableHandle,
    servers: TableHandle,
    nodes: TableHandle,
    logs: TableHandle,
    sessions: TableHandle,
}

impl Tables {
    fn all(&self) -> [&TableHandle; 5] {
        [
            &self.keys,
            &self.servers,
            &self.nodes,
            &self.logs,
            &self.sessions,
        ]
    }
}

fn table(name: &str, partition_key: Attribute) -> Table {
    Table {
        id: name.to_string(),
        table_name: name.to_string(),
        partition_key,
        sort_key: None,
        time_to_live_attribute: None,
        point_in_time_recovery: false,
        read_capacity: 1,
        write_capacity: 1,
        removal_policy: RemovalPolicy::Destroy,
        indexes: Vec::new(),
        scaling: Some(TABLE_SCALING),
    }
}

fn declare_tables(stack: &mut Stack) -> Result<Tables> {
    let keys = Table {
        point_in_time_recovery: true,
        ..table("KaginawaKeys", Attribute::string("Key"))
    };
    let servers = Table {
        point_in_time_recovery: true,
        ..table("KaginawaServers", Attribute::string("Host"))
    };
    let nodes = Table {
        indexes: vec![GlobalSecondaryIndex {
            name: CUSTOM_ID_INDEX.to_string(),
            partition_key: Attribute::string("CustomID"),
            read_capacity: 1,
            write_capacity: 1,
        }],
        ..table("KaginawaNodes", Attribute::string("ID"))
    };
    let logs = Table {
        sort_key: Some(Attribute::number("ServerTime")),
        time_to_live_attribute: Some("TTL".to_string()),
        ..table("KaginawaLogs", Attribute::string("ID"))
    };
    let sessions = Table {
        time_to_live_attribute: Some("TTL".to_string()),
        ..table("KaginawaSessions", Attribute::string("ID"))
    };

    Ok(Tables {
        keys: declare(stack, &keys)?,
        servers: declare(stack, &servers)?,
        nodes: declare(stack, &nodes)?,
        logs: declare(stack, &logs)?,
        sessions: declare(stack, &sessions)?,
    })
}

/// SSH relay instances, each with its own role and elastic IP
fn declare_ssh_instances(stack: &mut Stack, count: usize, network: &NetworkHandle) -> Result<()> {
    let subnet = network
        .default_subnet()
        .context("The network declares no subnet to place instances in")?;

    for i in 1..=count {
        let role = declare(
            stack,
            &Role {
                id: format!("KaginawaSSHInstanceSSM{i}"),
                assumed_by: "ec2.amazonaws.com".to_string(),
                managed_policies: vec!["AmazonSSMManagedInstanceCore".to_string()],
            },
        )?;
        let instance = declare(
            stack,
            &Instance {
                id: format!("KaginawaSSHInstance{i}"),
                name: format!("kssh{i}"),
                instance_type: InstanceType::of("t4g", "micro"),
                image: MachineImage::generic_linux(SSH_INSTANCE_AMIS),
                image_mapping: "KaginawaSSHInstanceAmiMap".to_string(),
                role,
                vpc: network.vpc_id(),
                subnet: subnet.clone(),
            },
        )?;
        let security_group = instance.security_group.clone();
        let eip = declare(
            stack,
            &ElasticIp {
                id: format!("KaginawaEIP{i}"),
                association_id: format!("KaginawaEIPAssoc{i}"),
                instance,
            },
        )?;
        log::debug!(
            "kssh{i}: {} bound through {}, guarded by {}",
            eip.logical_id,
            eip.association_id,
            security_group
        );
    }
    Ok(())
}

/// Environment handed to the server container
fn container_environment(config: &StackConfig, tables: &Tables) -> Vec<(String, Expr)> {
    let oauth = &config.oauth;
    [
        ("DYNAMO_KEYS", tables.keys.name()),
        ("DYNAMO_SERVERS", tables.servers.name()),
        ("DYNAMO_NODES", tables.nodes.name()),
        ("DYNAMO_LOGS", tables.logs.name()),
        ("DYNAMO_SESSIONS", tables.sessions.name()),
        ("DYNAMO_CUSTOM_IDS", Expr::from(CUSTOM_ID_INDEX)),
        (config::OAUTH_TYPE, Expr::from(oauth.provider.as_str())),
        (config::OAUTH_DOMAIN, Expr::from(oauth.domain.as_str())),
        (config::OAUTH_CLIENT_ID, Expr::from(oauth.client_id.as_str())),
        (config::OAUTH_CLIENT_SECRET, Expr::from(oauth.client_secret.as_str())),
        ("DYNAMO_LOGS_TTL_DAYS", Expr::from(LOGS_TTL_DAYS.to_string())),
        ("DYNAMO_SESSIONS_TTL_DAYS", Expr::from(SESSIONS_TTL_DAYS.to_string())),
        ("SELF_URL", Expr::from(config.self_url())),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

/// Build the Kaginawa stack from configuration
pub fn build(config: &StackConfig, stack_name: &str) -> Result<Stack> {
    if config.ssh_servers > MAX_SSH_SERVERS {
        bail!(
            "{} is {}; at most {MAX_SSH_SERVERS} SSH servers fit in one template",
            config::NUM_OF_SSH_SERVERS,
            config.ssh_servers
        );
    }

    let mut stack = Stack::new(stack_name)
        .context("Invalid stack name")?
        .with_description("Kaginawa: SSH relay instances and the kaginawa-server service");

    let certificate = declare(
        &mut stack,
        &Certificate {
            id: "KaginawaCertificate".to_string(),
            domain_name: config.domain_name.clone(),
        },
    )?;

    let network = declare(
        &mut stack,
        &Network {
            id: "KaginawaVPC".to_string(),
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: 0,
            subnets: vec![SubnetConfiguration {
                name: "KaginawaVPCSubnet".to_string(),
                cidr_mask: 24,
                subnet_type: SubnetType::Public,
            }],
        },
    )?;

    declare_ssh_instances(&mut stack, config.ssh_servers, &network)?;

    let tables = declare_tables(&mut stack)?;

    let cluster = declare(
        &mut stack,
        &Cluster {
            id: "KaginawaServerStack".to_string(),
            cluster_name: "KaginawaServer".to_string(),
        },
    )?;

    let service = declare(
        &mut stack,
        &LoadBalancedFargateService {
            id: "KaginawaServer".to_string(),
            service_name: "KaginawaServer".to_string(),
            cluster,
            network,
            cpu: 256,
            memory_mib: 512,
            desired_count: 1,
            assign_public_ip: true,
            public_load_balancer: true,
            listener_port: 8080,
            image: "kaginawa/kaginawa-server".to_string(),
            container_name: "web".to_string(),
            container_port: 8080,
            environment: container_environment(config, &tables),
            stickiness: Some(Stickiness {
                cookie_name: "kaginawa-alb".to_string(),
                duration_secs: 3 * 60,
            }),
            task_role_statements: vec![PolicyStatement::allow(
                ["dynamodb:*"],
                tables.all().iter().map(|t| t.arn()).collect(),
            )],
        },
    )?;

    log::debug!(
        "{} runs {} behind {} as {} ({})",
        service.service,
        service.task_definition,
        service.listener,
        service.task_role.logical_id,
        service.task_role_policy.as_deref().unwrap_or("no inline policy")
    );

    declare(
        &mut stack,
        &HttpsListener {
            id: "KaginawaServerALB443".to_string(),
            port: 443,
            load_balancer: service.load_balancer.clone(),
            load_balancer_security_group: service.load_balancer_security_group.clone(),
            target_group: service.target_group.clone(),
            certificates: vec![certificate.arn()],
        },
    )?;

    log::info!(
        "declared {} resources for {} ({} SSH instance(s))",
        stack.len(),
        stack.name(),
        config.ssh_servers
    );
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{certificate, instance, network, service, table};
    use declarative::{DependencyGraph, MAX_TEMPLATE_RESOURCES, Template, synthesize};

    fn config(domain: &str, count: Option<&str>) -> StackConfig {
        let count = count.map(str::to_string);
        let domain = domain.to_string();
        StackConfig::from_lookup(move |key| match key {
            config::DOMAIN_NAME => Some(domain.clone()),
            config::NUM_OF_SSH_SERVERS => count.clone(),
            config::OAUTH_TYPE => Some("github".to_string()),
            config::OAUTH_CLIENT_SECRET => Some("s3cret".to_string()),
            _ => None,
        })
    }

    fn template(domain: &str, count: Option<&str>) -> Template {
        let stack = build(&config(domain, count), DEFAULT_STACK_NAME).unwrap();
        synthesize(&stack).unwrap()
    }

    fn environment(template: &Template) -> Vec<(String, serde_json::Value)> {
        let task = template.resource("KaginawaServerTaskDef").unwrap();
        task.properties["ContainerDefinitions"][0]["Environment"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| (e["Name"].as_str().unwrap().to_string(), e["Value"].clone()))
            .collect()
    }

    #[test]
    fn test_example_domain_scenario() {
        let template = template("example.com", None);

        assert_eq!(template.count_of_type(instance::INSTANCE), 1);
        assert_eq!(template.count_of_type(certificate::CERTIFICATE), 1);
        assert_eq!(template.count_of_type(table::TABLE), 5);
        assert_eq!(template.count_of_type(service::SERVICE), 1);

        let cert = template.resource("KaginawaCertificate").unwrap();
        assert_eq!(cert.properties["DomainName"], "example.com");

        let mut ports: Vec<u64> = template
            .ids_of_type(service::LISTENER)
            .iter()
            .map(|id| template.resource(id).unwrap().properties["Port"].as_u64().unwrap())
            .collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![443, 8080]);

        let task = template.resource("KaginawaServerTaskDef").unwrap();
        assert_eq!(
            task.properties["ContainerDefinitions"][0]["PortMappings"][0]["ContainerPort"],
            8080
        );
    }

    #[test]
    fn test_instance_fan_out() {
        let template = template("example.com", Some("3"));
        assert_eq!(
            template.ids_of_type(instance::INSTANCE),
            vec!["KaginawaSSHInstance1", "KaginawaSSHInstance2", "KaginawaSSHInstance3"]
        );
        assert_eq!(
            template.ids_of_type(instance::EIP),
            vec!["KaginawaEIP1", "KaginawaEIP2", "KaginawaEIP3"]
        );
        assert_eq!(
            template.ids_of_type(instance::EIP_ASSOCIATION),
            vec!["KaginawaEIPAssoc1", "KaginawaEIPAssoc2", "KaginawaEIPAssoc3"]
        );

        let assoc = template.resource("KaginawaEIPAssoc2").unwrap();
        assert_eq!(assoc.properties["EIP"]["Ref"], "KaginawaEIP2");
        assert_eq!(assoc.properties["InstanceId"]["Ref"], "KaginawaSSHInstance2");

        let second = template.resource("KaginawaSSHInstance2").unwrap();
        assert_eq!(second.properties["Tags"][0]["Value"], "kssh2");
        assert_eq!(second.properties["InstanceType"], "t4g.micro");
        assert!(template.resource("KaginawaSSHInstanceSSM3").is_some());
    }

    #[test]
    fn test_invalid_counts_yield_one_instance() {
        for count in [None, Some("0"), Some("-2"), Some("many"), Some("")] {
            let template = template("example.com", count);
            assert_eq!(
                template.ids_of_type(instance::INSTANCE),
                vec!["KaginawaSSHInstance1"],
                "count {count:?}"
            );
            assert_eq!(template.count_of_type(instance::EIP), 1);
        }
    }

    #[test]
    fn test_instance_count_is_bounded() {
        let most = MAX_SSH_SERVERS.to_string();
        let stack = build(&config("example.com", Some(&most)), DEFAULT_STACK_NAME).unwrap();
        assert!(stack.len() <= MAX_TEMPLATE_RESOURCES, "{} resources", stack.len());

        for count in [(MAX_SSH_SERVERS + 1).to_string(), "1000000000".to_string()] {
            let too_many = config("example.com", Some(&count));
            let err = build(&too_many, DEFAULT_STACK_NAME).unwrap_err();
            assert!(err.to_string().contains(config::NUM_OF_SSH_SERVERS), "{err}");
        }
    }

    #[test]
    fn test_network_layout() {
        let template = template("example.com", None);
        let vpc = template.resource("KaginawaVPC").unwrap();
        assert_eq!(vpc.properties["CidrBlock"], "10.0.0.0/16");
        assert_eq!(vpc.properties["EnableDnsSupport"], true);
        assert_eq!(vpc.properties["EnableDnsHostnames"], true);

        let subnets = template.ids_of_type(network::SUBNET);
        assert_eq!(subnets.len(), 2);
        let cidrs: Vec<&str> = subnets
            .iter()
            .map(|id| template.resource(id).unwrap().properties["CidrBlock"].as_str().unwrap())
            .collect();
        assert_eq!(cidrs, vec!["10.0.0.0/24", "10.0.1.0/24"]);
        for (zone, id) in subnets.iter().enumerate() {
            let subnet = template.resource(id).unwrap();
            assert_eq!(subnet.properties["AvailabilityZone"]["Fn::Select"][0], zone);
            assert_eq!(subnet.properties["MapPublicIpOnLaunch"], true);
        }
        assert_eq!(template.count_of_type(network::NAT_GATEWAY), 0);
    }

    #[test]
    fn test_every_table_is_destroyed_and_autoscaled() {
        let template = template("example.com", None);
        for id in template.ids_of_type(table::TABLE) {
            let resource = template.resource(id).unwrap();
            assert_eq!(resource.deletion_policy, Some(RemovalPolicy::Destroy), "{id}");
            assert_eq!(resource.properties["ProvisionedThroughput"]["ReadCapacityUnits"], 1);

            let targets: Vec<&str> = template
                .ids_of_type(table::SCALABLE_TARGET)
                .into_iter()
                .filter(|t| t.starts_with(id))
                .collect();
            assert!(targets.len() >= 2, "{id} has {} scaling targets", targets.len());
            for target in targets {
                let props = &template.resource(target).unwrap().properties;
                assert_eq!(props["MinCapacity"], 1);
                assert_eq!(props["MaxCapacity"], 100);
            }
        }
        for id in template.ids_of_type(table::SCALING_POLICY) {
            let props = &template.resource(id).unwrap().properties;
            assert_eq!(
                props["TargetTrackingScalingPolicyConfiguration"]["TargetValue"],
                80.0
            );
        }
        // 5 tables and one index, read and write each
        assert_eq!(template.count_of_type(table::SCALABLE_TARGET), 12);
        assert_eq!(template.count_of_type(table::SCALING_POLICY), 12);
    }

    #[test]
    fn test_https_listener_references_certificate() {
        let template = template("kaginawa.example", None);
        let listener = template.resource("KaginawaServerALB443").unwrap();
        assert_eq!(listener.properties["Protocol"], "HTTPS");
        assert_eq!(
            listener.properties["Certificates"][0]["CertificateArn"]["Ref"],
            "KaginawaCertificate"
        );
        let cert = template.resource("KaginawaCertificate").unwrap();
        assert_eq!(cert.properties["DomainName"], "kaginawa.example");
    }

    #[test]
    fn test_container_environment() {
        let template = template("example.com", None);
        let env = environment(&template);
        let get = |name: &str| {
            env.iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| panic!("{name} missing"))
        };

        assert_eq!(env.len(), 13);
        assert_eq!(get("DYNAMO_KEYS")["Ref"], "KaginawaKeys");
        assert_eq!(get("DYNAMO_SESSIONS")["Ref"], "KaginawaSessions");
        assert_eq!(get("DYNAMO_CUSTOM_IDS"), "CustomID-index");
        assert_eq!(get("DYNAMO_LOGS_TTL_DAYS"), "90");
        assert_eq!(get("DYNAMO_SESSIONS_TTL_DAYS"), "180");
        assert_eq!(get("SELF_URL"), "https://example.com");
        assert_eq!(get("OAUTH_TYPE"), "github");
        assert_eq!(get("OAUTH_DOMAIN"), "");
    }

    #[test]
    fn test_task_role_policy_covers_tables() {
        let template = template("example.com", None);
        let policy = template
            .resource("KaginawaServerTaskDefTaskRoleDefaultPolicy")
            .unwrap();
        let statement = &policy.properties["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], "dynamodb:*");
        assert_eq!(statement["Effect"], "Allow");
        let tables: Vec<&str> = statement["Resource"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["Fn::GetAtt"][0].as_str().unwrap())
            .collect();
        assert_eq!(
            tables,
            vec![
                "KaginawaKeys",
                "KaginawaServers",
                "KaginawaNodes",
                "KaginawaLogs",
                "KaginawaSessions"
            ]
        );
        assert_eq!(policy.properties["Roles"][0]["Ref"], "KaginawaServerTaskDefTaskRole");

        let service = template.resource("KaginawaServerService").unwrap();
        assert!(
            service
                .depends_on
                .contains(&"KaginawaServerTaskDefTaskRoleDefaultPolicy".to_string())
        );
    }

    #[test]
    fn test_producers_emitted_before_consumers() {
        let stack = build(&config("example.com", Some("2")), DEFAULT_STACK_NAME).unwrap();
        let graph = DependencyGraph::from_stack(&stack).unwrap();
        let order = graph.topological_order().unwrap();
        let position = |id: &str| order.iter().position(|o| *o == id).unwrap();
        for (producer, consumer) in graph.edges() {
            assert!(position(producer) < position(consumer), "{producer} -> {consumer}");
        }
    }

    #[test]
    fn test_empty_configuration_still_builds() {
        let stack = build(&StackConfig::default(), DEFAULT_STACK_NAME).unwrap();
        let template = synthesize(&stack).unwrap();
        assert_eq!(
            template.resource("KaginawaCertificate").unwrap().properties["DomainName"],
            ""
        );
    }

    #[test]
    fn test_invalid_stack_name_rejected() {
        assert!(build(&StackConfig::default(), "not_valid").is_err());
    }

    #[test]
    fn test_template_round_trips() {
        let template = template("example.com", Some("2"));
        let json = template.to_json_pretty().unwrap();
        assert_eq!(Template::from_json(&json).unwrap(), template);
    }
}
