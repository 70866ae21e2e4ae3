//! Container service - ECS cluster, Fargate service behind an application load balancer

use super::iam::{Policy, PolicyStatement, Role, RoleHandle};
use super::network::{NetworkHandle, SecurityGroup};
use declarative::{
    Construct, Error, Expr, Output, Pseudo, RemovalPolicy, Resource, Result, Stack,
};

pub const CLUSTER: &str = "AWS::ECS::Cluster";
pub const SERVICE: &str = "AWS::ECS::Service";
pub const TASK_DEFINITION: &str = "AWS::ECS::TaskDefinition";
pub const LOAD_BALANCER: &str = "AWS::ElasticLoadBalancingV2::LoadBalancer";
pub const LISTENER: &str = "AWS::ElasticLoadBalancingV2::Listener";
pub const TARGET_GROUP: &str = "AWS::ElasticLoadBalancingV2::TargetGroup";
pub const LOG_GROUP: &str = "AWS::Logs::LogGroup";
pub const SECURITY_GROUP_INGRESS: &str = "AWS::EC2::SecurityGroupIngress";

const TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
const MAX_STICKINESS_SECS: u32 = 7 * 24 * 60 * 60;

/// An ECS cluster
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: String,
    pub cluster_name: String,
}

#[derive(Debug, Clone)]
pub struct ClusterHandle {
    pub logical_id: String,
}

impl Construct for Cluster {
    type Handle = ClusterHandle;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("ECS cluster {}", self.cluster_name)
    }

    fn declare(&self, stack: &mut Stack) -> Result<ClusterHandle> {
        let logical_id = stack.add(
            Resource::new(&self.id, CLUSTER).property("ClusterName", self.cluster_name.as_str()),
        )?;
        Ok(ClusterHandle { logical_id })
    }
}

/// Application-cookie stickiness on the target group
#[derive(Debug, Clone)]
pub struct Stickiness {
    pub cookie_name: String,
    pub duration_secs: u32,
}

/// Check a Fargate task size: CPU units and the memory sizes allowed for them
pub fn validate_task_size(cpu: u32, memory_mib: u32) -> std::result::Result<(), String> {
    let allowed = match cpu {
        256 => matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory_mib) && memory_mib % 1024 == 0,
        1024 => (2048..=8192).contains(&memory_mib) && memory_mib % 1024 == 0,
        2048 => (4096..=16384).contains(&memory_mib) && memory_mib % 1024 == 0,
        4096 => (8192..=30720).contains(&memory_mib) && memory_mib % 1024 == 0,
        _ => return Err(format!("{cpu} is not a valid Fargate CPU value")),
    };
    if allowed {
        Ok(())
    } else {
        Err(format!("{memory_mib} MiB is not valid with {cpu} CPU units"))
    }
}

/// Single-container Fargate service fronted by an application load balancer
#[derive(Debug, Clone)]
pub struct LoadBalancedFargateService {
    pub id: String,
    pub service_name: String,
    pub cluster: ClusterHandle,
    pub network: NetworkHandle,
    pub cpu: u32,
    pub memory_mib: u32,
    pub desired_count: u32,
    pub assign_public_ip: bool,
    pub public_load_balancer: bool,
    pub listener_port: u16,
    pub image: String,
    pub container_name: String,
    pub container_port: u16,
    /// Container environment, in declaration order
    pub environment: Vec<(String, Expr)>,
    pub stickiness: Option<Stickiness>,
    /// Statements granted to the task role; the service waits for them
    pub task_role_statements: Vec<PolicyStatement>,
}

/// Logical ids of what a load balanced service declared
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub service: String,
    pub load_balancer: String,
    pub load_balancer_security_group: String,
    pub listener: String,
    pub target_group: String,
    pub task_definition: String,
    pub task_role: RoleHandle,
    pub task_role_policy: Option<String>,
}

/// Standalone TCP ingress rule on an existing security group
fn ingress_rule(id: String, group: &str, port: u16, source_key: &str, source: Expr) -> Resource {
    Resource::new(id, SECURITY_GROUP_INGRESS)
        .property("Description", format!("Allow from port {port}"))
        .property("FromPort", port)
        .property("GroupId", SecurityGroup::group_id(group))
        .property("IpProtocol", "tcp")
        .property(source_key.to_string(), source)
        .property("ToPort", port)
}

fn forward_to(target_group: &str) -> Expr {
    Expr::list([Expr::object([
        ("TargetGroupArn", Expr::reference(target_group)),
        ("Type", Expr::from("forward")),
    ])])
}

fn key_value(key: &str, value: impl Into<Expr>) -> Expr {
    Expr::object([("Key", Expr::from(key)), ("Value", value.into())])
}

impl LoadBalancedFargateService {
    fn validate(&self) -> Result<()> {
        validate_task_size(self.cpu, self.memory_mib)
            .map_err(|reason| Error::invalid_property(&self.id, reason))?;
        if self.network.public_subnets().is_empty()
            && (self.assign_public_ip || self.public_load_balancer)
        {
            return Err(Error::invalid_property(
                &self.id,
                "a public IP or public load balancer needs a public subnet",
            ));
        }
        if let Some(sticky) = &self.stickiness
            && !(1..=MAX_STICKINESS_SECS).contains(&sticky.duration_secs)
        {
            return Err(Error::invalid_property(
                &self.id,
                format!(
                    "stickiness duration {}s must be between 1s and 7 days",
                    sticky.duration_secs
                ),
            ));
        }
        Ok(())
    }

    fn subnet_ids(&self) -> Expr {
        let subnets = if self.public_load_balancer || self.assign_public_ip {
            self.network.public_subnets()
        } else {
            self.network.subnets.iter().collect()
        };
        Expr::List(subnets.iter().map(|s| s.id()).collect())
    }

    fn declare_load_balancer(&self, stack: &mut Stack) -> Result<(String, String)> {
        let security_group = SecurityGroup {
            id: format!("{}LBSecurityGroup", self.id),
            description: format!("Automatically created Security Group for ELB {}LB", self.id),
            vpc: self.network.vpc_id(),
            ingress: vec![(self.listener_port, "0.0.0.0/0".to_string())],
        }
        .declare(stack)?;

        let scheme = if self.public_load_balancer {
            "internet-facing"
        } else {
            "internal"
        };
        let mut resource = Resource::new(format!("{}LB", self.id), LOAD_BALANCER)
            .property(
                "LoadBalancerAttributes",
                Expr::list([key_value("deletion_protection.enabled", "false")]),
            )
            .property("Scheme", scheme)
            .property(
                "SecurityGroups",
                Expr::list([SecurityGroup::group_id(&security_group)]),
            )
            .property("Subnets", self.subnet_ids())
            .property("Type", "application");
        // The balancer is unreachable until the public routes exist
        if self.public_load_balancer {
            for route in self.network.public_routes() {
                resource = resource.depends_on(route);
            }
        }
        let load_balancer = stack.add(resource)?;
        Ok((load_balancer, security_group))
    }

    fn declare_target_group(&self, stack: &mut Stack) -> Result<String> {
        let mut attributes = Vec::new();
        if let Some(sticky) = &self.stickiness {
            attributes.push(key_value("stickiness.enabled", "true"));
            attributes.push(key_value("stickiness.type", "app_cookie"));
            attributes.push(key_value(
                "stickiness.app_cookie.cookie_name",
                sticky.cookie_name.as_str(),
            ));
            attributes.push(key_value(
                "stickiness.app_cookie.duration_seconds",
                sticky.duration_secs.to_string(),
            ));
        }
        stack.add(
            Resource::new(format!("{}LBPublicListenerECSGroup", self.id), TARGET_GROUP)
                .property("Port", 80u16)
                .property("Protocol", "HTTP")
                .property_opt(
                    "TargetGroupAttributes",
                    (!attributes.is_empty()).then_some(attributes),
                )
                .property("TargetType", "ip")
                .property("VpcId", self.network.vpc_id()),
        )
    }

    fn declare_task_role(&self, stack: &mut Stack) -> Result<(RoleHandle, Option<String>)> {
        let task_role = Role {
            id: format!("{}TaskDefTaskRole", self.id),
            assumed_by: TASKS_PRINCIPAL.to_string(),
            managed_policies: Vec::new(),
        }
        .declare(stack)?;
        if self.task_role_statements.is_empty() {
            return Ok((task_role, None));
        }
        let policy = Policy {
            id: format!("{}TaskDefTaskRoleDefaultPolicy", self.id),
            statements: self.task_role_statements.clone(),
            roles: vec![task_role.clone()],
        }
        .declare(stack)?;
        Ok((task_role, Some(policy)))
    }

    fn declare_task_definition(
        &self,
        stack: &mut Stack,
        task_role: &RoleHandle,
    ) -> Result<String> {
        let execution_role = Role {
            id: format!("{}TaskDefExecutionRole", self.id),
            assumed_by: TASKS_PRINCIPAL.to_string(),
            managed_policies: Vec::new(),
        }
        .declare(stack)?;

        let log_group = stack.add(
            Resource::new(
                format!("{}TaskDef{}LogGroup", self.id, self.container_name),
                LOG_GROUP,
            )
            .removal_policy(RemovalPolicy::Retain),
        )?;
        let execution_policy = Policy {
            id: format!("{}TaskDefExecutionRoleDefaultPolicy", self.id),
            statements: vec![PolicyStatement::allow(
                ["logs:CreateLogStream", "logs:PutLogEvents"],
                vec![Expr::get_att(&log_group, "Arn")],
            )],
            roles: vec![execution_role.clone()],
        }
        .declare(stack)?;

        let environment: Vec<Expr> = self
            .environment
            .iter()
            .map(|(name, value)| {
                Expr::object([("Name", Expr::from(name)), ("Value", value.clone())])
            })
            .collect();
        let container = Expr::object([
            ("Environment", Expr::List(environment)),
            ("Essential", Expr::from(true)),
            ("Image", Expr::from(self.image.as_str())),
            (
                "LogConfiguration",
                Expr::object([
                    ("LogDriver", Expr::from("awslogs")),
                    (
                        "Options",
                        Expr::object([
                            ("awslogs-group", Expr::reference(&log_group)),
                            ("awslogs-region", Expr::Pseudo(Pseudo::Region)),
                            ("awslogs-stream-prefix", Expr::from(self.id.as_str())),
                        ]),
                    ),
                ]),
            ),
            ("Name", Expr::from(self.container_name.as_str())),
            (
                "PortMappings",
                Expr::list([Expr::object([
                    ("ContainerPort", Expr::from(self.container_port)),
                    ("Protocol", Expr::from("tcp")),
                ])]),
            ),
        ]);

        let task_definition = stack.add(
            Resource::new(format!("{}TaskDef", self.id), TASK_DEFINITION)
                .property("ContainerDefinitions", Expr::list([container]))
                .property("Cpu", self.cpu.to_string())
                .property("ExecutionRoleArn", execution_role.arn())
                .property("Family", format!("{}TaskDef", self.id))
                .property("Memory", self.memory_mib.to_string())
                .property("NetworkMode", "awsvpc")
                .property("RequiresCompatibilities", Expr::list(["FARGATE"]))
                .property("TaskRoleArn", task_role.arn())
                .depends_on(execution_policy),
        )?;
        Ok(task_definition)
    }
}

impl Construct for LoadBalancedFargateService {
    type Handle = ServiceHandle;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!(
            "Fargate service {} ({}, {} CPU / {} MiB, port {})",
            self.service_name, self.image, self.cpu, self.memory_mib, self.listener_port
        )
    }

    fn declare(&self, stack: &mut Stack) -> Result<ServiceHandle> {
        self.validate()?;

        let (load_balancer, lb_security_group) = self.declare_load_balancer(stack)?;
        let target_group = self.declare_target_group(stack)?;
        let listener = stack.add(
            Resource::new(format!("{}LBPublicListener", self.id), LISTENER)
                .property("DefaultActions", forward_to(&target_group))
                .property("LoadBalancerArn", Expr::reference(&load_balancer))
                .property("Port", self.listener_port)
                .property("Protocol", "HTTP"),
        )?;
        let (task_role, task_role_policy) = self.declare_task_role(stack)?;
        let task_definition = self.declare_task_definition(stack, &task_role)?;

        let service_security_group = SecurityGroup {
            id: format!("{}ServiceSecurityGroup", self.id),
            description: format!("{}/Service/SecurityGroup", self.id),
            vpc: self.network.vpc_id(),
            ingress: Vec::new(),
        }
        .declare(stack)?;
        stack.add(ingress_rule(
            format!("{}ServiceSecurityGroupFromLB{}", self.id, self.container_port),
            &service_security_group,
            self.container_port,
            "SourceSecurityGroupId",
            SecurityGroup::group_id(&lb_security_group),
        ))?;

        let assign_public_ip = if self.assign_public_ip {
            "ENABLED"
        } else {
            "DISABLED"
        };
        let mut service = Resource::new(format!("{}Service", self.id), SERVICE)
            .property("Cluster", Expr::reference(&self.cluster.logical_id))
            .property(
                "DeploymentConfiguration",
                Expr::object([
                    ("MaximumPercent", 200u32),
                    ("MinimumHealthyPercent", 50u32),
                ]),
            )
            .property("DesiredCount", self.desired_count)
            .property("EnableECSManagedTags", false)
            .property("HealthCheckGracePeriodSeconds", 60u32)
            .property("LaunchType", "FARGATE")
            .property(
                "LoadBalancers",
                Expr::list([Expr::object([
                    ("ContainerName", Expr::from(self.container_name.as_str())),
                    ("ContainerPort", Expr::from(self.container_port)),
                    ("TargetGroupArn", Expr::reference(&target_group)),
                ])]),
            )
            .property(
                "NetworkConfiguration",
                Expr::object([(
                    "AwsvpcConfiguration",
                    Expr::object([
                        ("AssignPublicIp", Expr::from(assign_public_ip)),
                        (
                            "SecurityGroups",
                            Expr::list([SecurityGroup::group_id(&service_security_group)]),
                        ),
                        ("Subnets", self.subnet_ids()),
                    ]),
                )]),
            )
            .property("ServiceName", self.service_name.as_str())
            .property("TaskDefinition", Expr::reference(&task_definition))
            .depends_on(listener.as_str())
            .depends_on(task_role.logical_id.as_str());
        // Tasks must not start before their permissions are attached
        if let Some(policy) = &task_role_policy {
            service = service.depends_on(policy.as_str());
        }
        let service = stack.add(service)?;

        let dns = Expr::get_att(&load_balancer, "DNSName");
        stack.add_output(Output {
            logical_id: format!("{}LoadBalancerDNS", self.id),
            description: None,
            value: dns.clone(),
        })?;
        stack.add_output(Output {
            logical_id: format!("{}ServiceURL", self.id),
            description: None,
            value: Expr::join("", vec![Expr::from("http://"), dns]),
        })?;

        log::debug!(
            "declared service {} behind {} on port {}",
            service,
            load_balancer,
            self.listener_port
        );
        Ok(ServiceHandle {
            service,
            load_balancer,
            load_balancer_security_group: lb_security_group,
            listener,
            target_group,
            task_definition,
            task_role,
            task_role_policy,
        })
    }
}

/// An extra HTTPS listener on an existing load balancer
#[derive(Debug, Clone)]
pub struct HttpsListener {
    pub id: String,
    pub port: u16,
    pub load_balancer: String,
    pub load_balancer_security_group: String,
    pub target_group: String,
    /// Certificate ARNs
    pub certificates: Vec<Expr>,
}

impl Construct for HttpsListener {
    type Handle = String;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("HTTPS listener {} on port {}", self.id, self.port)
    }

    fn declare(&self, stack: &mut Stack) -> Result<String> {
        if self.certificates.is_empty() {
            return Err(Error::invalid_property(
                &self.id,
                "an HTTPS listener needs at least one certificate",
            ));
        }
        let certificates: Vec<Expr> = self
            .certificates
            .iter()
            .map(|arn| Expr::object([("CertificateArn", arn.clone())]))
            .collect();
        let listener = stack.add(
            Resource::new(&self.id, LISTENER)
                .property("Certificates", certificates)
                .property("DefaultActions", forward_to(&self.target_group))
                .property("LoadBalancerArn", Expr::reference(&self.load_balancer))
                .property("Port", self.port)
                .property("Protocol", "HTTPS"),
        )?;
        stack.add(ingress_rule(
            format!("{}IngressFrom{}", self.load_balancer_security_group, self.port),
            &self.load_balancer_security_group,
            self.port,
            "CidrIp",
            Expr::from("0.0.0.0/0"),
        ))?;
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::network::{Network, SubnetConfiguration, SubnetType};
    use declarative::synthesize;

    fn stack_with_network() -> (Stack, NetworkHandle) {
        let mut stack = Stack::new("Test").unwrap();
        let network = Network {
            id: "Vpc".into(),
            cidr: "10.0.0.0/16".into(),
            max_azs: 2,
            nat_gateways: 0,
            subnets: vec![SubnetConfiguration {
                name: "Public".into(),
                cidr_mask: 24,
                subnet_type: SubnetType::Public,
            }],
        }
        .declare(&mut stack)
        .unwrap();
        (stack, network)
    }

    fn service(network: NetworkHandle, cluster: ClusterHandle) -> LoadBalancedFargateService {
        LoadBalancedFargateService {
            id: "Web".into(),
            service_name: "Web".into(),
            cluster,
            network,
            cpu: 256,
            memory_mib: 512,
            desired_count: 1,
            assign_public_ip: true,
            public_load_balancer: true,
            listener_port: 8080,
            image: "nginx".into(),
            container_name: "web".into(),
            container_port: 8080,
            environment: vec![("A".into(), Expr::from("1"))],
            stickiness: Some(Stickiness {
                cookie_name: "sticky".into(),
                duration_secs: 180,
            }),
            task_role_statements: vec![PolicyStatement::allow(
                ["dynamodb:*"],
                vec![Expr::from("arn:aws:dynamodb:*:*:table/Web")],
            )],
        }
    }

    fn declare_service(stack: &mut Stack, network: NetworkHandle) -> ServiceHandle {
        let cluster = Cluster {
            id: "Cluster".into(),
            cluster_name: "Cluster".into(),
        }
        .declare(stack)
        .unwrap();
        service(network, cluster).declare(stack).unwrap()
    }

    #[test]
    fn test_validate_task_size() {
        assert!(validate_task_size(256, 512).is_ok());
        assert!(validate_task_size(1024, 3072).is_ok());
        assert!(validate_task_size(256, 4096).is_err());
        assert!(validate_task_size(300, 512).is_err());
    }

    #[test]
    fn test_service_synthesizes() {
        let (mut stack, network) = stack_with_network();
        let handle = declare_service(&mut stack, network);
        let template = synthesize(&stack).unwrap();

        let listener = template.resource(&handle.listener).unwrap();
        assert_eq!(listener.properties["Port"], 8080);
        assert_eq!(listener.properties["Protocol"], "HTTP");

        let task = template.resource(&handle.task_definition).unwrap();
        assert_eq!(task.properties["Cpu"], "256");
        assert_eq!(task.properties["Memory"], "512");
        let container = &task.properties["ContainerDefinitions"][0];
        assert_eq!(container["Name"], "web");
        assert_eq!(container["PortMappings"][0]["ContainerPort"], 8080);
        assert_eq!(container["Environment"][0]["Name"], "A");

        let service = template.resource(&handle.service).unwrap();
        assert_eq!(
            service.properties["NetworkConfiguration"]["AwsvpcConfiguration"]["AssignPublicIp"],
            "ENABLED"
        );
        assert!(service.depends_on.contains(&handle.listener));
        assert_eq!(template.outputs.len(), 2);
    }

    #[test]
    fn test_service_waits_for_task_role_policy() {
        let (mut stack, network) = stack_with_network();
        let handle = declare_service(&mut stack, network);
        let policy = handle.task_role_policy.clone().unwrap();
        assert_eq!(policy, "WebTaskDefTaskRoleDefaultPolicy");

        let template = synthesize(&stack).unwrap();
        let service = template.resource(&handle.service).unwrap();
        assert!(service.depends_on.contains(&policy));
        assert!(service.depends_on.contains(&handle.task_role.logical_id));
        let document = &template.resource(&policy).unwrap().properties["PolicyDocument"];
        assert_eq!(document["Statement"][0]["Action"], "dynamodb:*");
    }

    #[test]
    fn test_no_task_role_policy_without_statements() {
        let (mut stack, network) = stack_with_network();
        let cluster = ClusterHandle {
            logical_id: "Cluster".into(),
        };
        let mut web = service(network, cluster);
        web.task_role_statements.clear();
        let handle = web.declare(&mut stack).unwrap();
        assert!(handle.task_role_policy.is_none());
        assert_eq!(stack.of_type(crate::resource::iam::POLICY).count(), 1);
    }

    #[test]
    fn test_target_group_stickiness() {
        let (mut stack, network) = stack_with_network();
        let handle = declare_service(&mut stack, network);
        let tg = stack.get(&handle.target_group).unwrap();
        let attributes = tg.get("TargetGroupAttributes").unwrap().to_value();
        let find = |key: &str| {
            attributes
                .as_array()
                .unwrap()
                .iter()
                .find(|a| a["Key"] == key)
                .map(|a| a["Value"].clone())
        };
        assert_eq!(find("stickiness.type").unwrap(), "app_cookie");
        assert_eq!(find("stickiness.app_cookie.cookie_name").unwrap(), "sticky");
        assert_eq!(find("stickiness.app_cookie.duration_seconds").unwrap(), "180");
        assert_eq!(tg.get("TargetType").and_then(Expr::as_str), Some("ip"));
    }

    #[test]
    fn test_invalid_stickiness_rejected() {
        let (mut stack, network) = stack_with_network();
        let cluster = ClusterHandle {
            logical_id: "Cluster".into(),
        };
        let mut web = service(network, cluster);
        web.stickiness = Some(Stickiness {
            cookie_name: "sticky".into(),
            duration_secs: 0,
        });
        assert!(web.declare(&mut stack).is_err());
    }

    #[test]
    fn test_https_listener_uses_certificate() {
        let (mut stack, network) = stack_with_network();
        stack
            .add(Resource::new("Cert", "AWS::CertificateManager::Certificate"))
            .unwrap();
        let handle = declare_service(&mut stack, network);
        let listener = HttpsListener {
            id: "Web443".into(),
            port: 443,
            load_balancer: handle.load_balancer.clone(),
            load_balancer_security_group: handle.load_balancer_security_group.clone(),
            target_group: handle.target_group.clone(),
            certificates: vec![Expr::reference("Cert")],
        }
        .declare(&mut stack)
        .unwrap();

        let template = synthesize(&stack).unwrap();
        let resource = template.resource(&listener).unwrap();
        assert_eq!(resource.properties["Port"], 443);
        assert_eq!(resource.properties["Protocol"], "HTTPS");
        assert_eq!(resource.properties["Certificates"][0]["CertificateArn"]["Ref"], "Cert");
        assert_eq!(template.ids_of_type(SECURITY_GROUP_INGRESS).len(), 2);
    }

    #[test]
    fn test_https_listener_requires_certificate() {
        let mut stack = Stack::new("Test").unwrap();
        let listener = HttpsListener {
            id: "Web443".into(),
            port: 443,
            load_balancer: "Lb".into(),
            load_balancer_security_group: "LbSg".into(),
            target_group: "Tg".into(),
            certificates: Vec::new(),
        };
        assert!(listener.declare(&mut stack).is_err());
    }
}
