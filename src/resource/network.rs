//! Network - VPC with subnets spread over availability zones

use declarative::{Construct, Error, Expr, Resource, Result, Stack};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub const VPC: &str = "AWS::EC2::VPC";
pub const SUBNET: &str = "AWS::EC2::Subnet";
pub const ROUTE_TABLE: &str = "AWS::EC2::RouteTable";
pub const ROUTE_TABLE_ASSOCIATION: &str = "AWS::EC2::SubnetRouteTableAssociation";
pub const ROUTE: &str = "AWS::EC2::Route";
pub const INTERNET_GATEWAY: &str = "AWS::EC2::InternetGateway";
pub const GATEWAY_ATTACHMENT: &str = "AWS::EC2::VPCGatewayAttachment";
pub const NAT_GATEWAY: &str = "AWS::EC2::NatGateway";
pub const SECURITY_GROUP: &str = "AWS::EC2::SecurityGroup";

/// An IPv4 CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub address: Ipv4Addr,
    pub prefix: u8,
}

impl Cidr {
    /// Number of addresses in this block
    pub fn size(&self) -> u64 {
        1u64 << (32 - self.prefix)
    }

    /// First aligned block of size `/mask` starting at or after `offset`
    ///
    /// `offset` counts addresses from the start of this block. Returns the
    /// block and the offset just past it, or `None` when it does not fit.
    pub fn allocate(&self, mask: u8, offset: u64) -> Option<(Cidr, u64)> {
        if mask < self.prefix || mask > 32 {
            return None;
        }
        let block = 1u64 << (32 - mask);
        let start = offset.div_ceil(block).checked_mul(block)?;
        let end = start.checked_add(block)?;
        if end > self.size() {
            return None;
        }
        let address = u32::try_from(u64::from(u32::from(self.address)) + start).ok()?;
        let cidr = Cidr {
            address: Ipv4Addr::from(address),
            prefix: mask,
        };
        Some((cidr, end))
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("{s:?} is not in a.b.c.d/n form"))?;
        let address: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("invalid address in {s:?}: {e}"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| format!("invalid prefix in {s:?}: {e}"))?;
        if prefix > 32 {
            return Err(format!("prefix /{prefix} is larger than /32"));
        }
        let bits = u32::from(address);
        let host_mask = if prefix == 32 { 0 } else { u32::MAX >> prefix };
        if bits & host_mask != 0 {
            return Err(format!("{s:?} has host bits set"));
        }
        Ok(Self { address, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetType {
    /// Routed to an internet gateway, public IPs on launch
    Public,
    /// No route outside the VPC
    Isolated,
}

/// One group of subnets, repeated in every availability zone
#[derive(Debug, Clone)]
pub struct SubnetConfiguration {
    pub name: String,
    pub cidr_mask: u8,
    pub subnet_type: SubnetType,
}

/// A VPC construct
#[derive(Debug, Clone)]
pub struct Network {
    pub id: String,
    pub cidr: String,
    pub max_azs: usize,
    pub nat_gateways: usize,
    pub subnets: Vec<SubnetConfiguration>,
}

/// A declared subnet
#[derive(Debug, Clone)]
pub struct SubnetHandle {
    pub logical_id: String,
    pub cidr: Cidr,
    pub zone_index: usize,
    pub subnet_type: SubnetType,
    /// Route to the internet gateway, for public subnets
    pub default_route: Option<String>,
}

impl SubnetHandle {
    pub fn id(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    pub fn availability_zone(&self) -> Expr {
        Expr::availability_zone(self.zone_index)
    }
}

/// References to a declared network
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    pub vpc_logical_id: String,
    pub subnets: Vec<SubnetHandle>,
}

impl NetworkHandle {
    pub fn vpc_id(&self) -> Expr {
        Expr::reference(&self.vpc_logical_id)
    }

    pub fn public_subnets(&self) -> Vec<&SubnetHandle> {
        self.subnets
            .iter()
            .filter(|s| s.subnet_type == SubnetType::Public)
            .collect()
    }

    /// Subnet for single-instance placement: first public, else first of any kind
    pub fn default_subnet(&self) -> Option<&SubnetHandle> {
        self.public_subnets()
            .into_iter()
            .next()
            .or_else(|| self.subnets.first())
    }

    /// Default routes that internet-facing resources must wait for
    pub fn public_routes(&self) -> Vec<&str> {
        self.subnets
            .iter()
            .filter_map(|s| s.default_route.as_deref())
            .collect()
    }
}

fn name_tag(value: impl Into<Expr>) -> Expr {
    Expr::list([Expr::object([("Key", Expr::from("Name")), ("Value", value.into())])])
}

impl Network {
    fn validate(&self) -> Result<Cidr> {
        let cidr: Cidr = self
            .cidr
            .parse()
            .map_err(|e: String| Error::invalid_property(&self.id, e))?;
        if self.max_azs == 0 {
            return Err(Error::invalid_property(&self.id, "max_azs must be at least 1"));
        }
        if self.subnets.is_empty() {
            return Err(Error::invalid_property(&self.id, "no subnet configuration"));
        }
        // NAT gateways only serve private subnets, which this construct never creates
        if self.nat_gateways > 0 {
            return Err(Error::invalid_property(
                &self.id,
                format!(
                    "{} {NAT_GATEWAY} requested but no private subnets are configured",
                    self.nat_gateways
                ),
            ));
        }
        Ok(cidr)
    }

    fn declare_internet_gateway(&self, stack: &mut Stack) -> Result<(String, String)> {
        let igw = stack.add(
            Resource::new(format!("{}IGW", self.id), INTERNET_GATEWAY)
                .property("Tags", name_tag(self.id.as_str())),
        )?;
        let attachment = stack.add(
            Resource::new(format!("{}VPCGW", self.id), GATEWAY_ATTACHMENT)
                .property("InternetGatewayId", Expr::reference(&igw))
                .property("VpcId", Expr::reference(&self.id)),
        )?;
        Ok((igw, attachment))
    }
}

impl Construct for Network {
    type Handle = NetworkHandle;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!(
            "VPC {} ({}, {} AZs, {} subnet groups)",
            self.id,
            self.cidr,
            self.max_azs,
            self.subnets.len()
        )
    }

    fn declare(&self, stack: &mut Stack) -> Result<NetworkHandle> {
        let cidr = self.validate()?;

        let vpc = stack.add(
            Resource::new(&self.id, VPC)
                .property("CidrBlock", cidr.to_string())
                .property("EnableDnsHostnames", true)
                .property("EnableDnsSupport", true)
                .property("InstanceTenancy", "default")
                .property("Tags", name_tag(self.id.as_str())),
        )?;

        let has_public = self
            .subnets
            .iter()
            .any(|s| s.subnet_type == SubnetType::Public);
        let gateway = if has_public {
            Some(self.declare_internet_gateway(stack)?)
        } else {
            None
        };

        let mut subnets: Vec<SubnetHandle> = Vec::new();
        // One cursor across all groups, each block aligned to its own size
        let mut next_free = 0;
        for config in &self.subnets {
            for zone in 0..self.max_azs {
                let (block, end) = cidr.allocate(config.cidr_mask, next_free).ok_or_else(|| {
                    Error::invalid_property(
                        &self.id,
                        format!(
                            "{} has no room for subnet #{} of size /{}",
                            cidr,
                            subnets.len() + 1,
                            config.cidr_mask
                        ),
                    )
                })?;
                next_free = end;

                let prefix = format!("{}{}Subnet{}", self.id, config.name, zone + 1);
                let public = config.subnet_type == SubnetType::Public;
                let subnet = stack.add(
                    Resource::new(&prefix, SUBNET)
                        .property("AvailabilityZone", Expr::availability_zone(zone))
                        .property("CidrBlock", block.to_string())
                        .property("MapPublicIpOnLaunch", public)
                        .property("Tags", name_tag(prefix.as_str()))
                        .property("VpcId", Expr::reference(&vpc)),
                )?;
                let route_table = stack.add(
                    Resource::new(format!("{prefix}RouteTable"), ROUTE_TABLE)
                        .property("Tags", name_tag(prefix.as_str()))
                        .property("VpcId", Expr::reference(&vpc)),
                )?;
                stack.add(
                    Resource::new(format!("{prefix}RouteTableAssociation"), ROUTE_TABLE_ASSOCIATION)
                        .property("RouteTableId", Expr::reference(&route_table))
                        .property("SubnetId", Expr::reference(&subnet)),
                )?;

                let default_route = match (&gateway, public) {
                    (Some((igw, attachment)), true) => Some(stack.add(
                        Resource::new(format!("{prefix}DefaultRoute"), ROUTE)
                            .property("DestinationCidrBlock", "0.0.0.0/0")
                            .property("GatewayId", Expr::reference(igw))
                            .property("RouteTableId", Expr::reference(&route_table))
                            .depends_on(attachment.as_str()),
                    )?),
                    _ => None,
                };

                subnets.push(SubnetHandle {
                    logical_id: subnet,
                    cidr: block,
                    zone_index: zone,
                    subnet_type: config.subnet_type,
                    default_route,
                });
            }
        }

        log::debug!("declared {} with {} subnets", vpc, subnets.len());
        Ok(NetworkHandle {
            vpc_logical_id: vpc,
            subnets,
        })
    }
}

/// A security group with unrestricted egress
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    pub id: String,
    pub description: String,
    pub vpc: Expr,
    /// `(port, source CIDR)` pairs admitted over TCP
    pub ingress: Vec<(u16, String)>,
}

impl SecurityGroup {
    pub fn group_id(logical_id: &str) -> Expr {
        Expr::get_att(logical_id, "GroupId")
    }
}

/// Ingress rule over TCP on one port
pub fn tcp_ingress(port: u16, source: impl Into<Expr>, source_key: &str) -> Expr {
    Expr::object([
        (source_key, source.into()),
        ("Description", Expr::from(format!("Allow from port {port}"))),
        ("FromPort", Expr::from(port)),
        ("IpProtocol", Expr::from("tcp")),
        ("ToPort", Expr::from(port)),
    ])
}

impl Construct for SecurityGroup {
    type Handle = String;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Security group {}", self.id)
    }

    fn declare(&self, stack: &mut Stack) -> Result<String> {
        let egress = Expr::list([Expr::object([
            ("CidrIp", Expr::from("0.0.0.0/0")),
            ("Description", Expr::from("Allow all outbound traffic by default")),
            ("IpProtocol", Expr::from("-1")),
        ])]);
        let ingress: Vec<Expr> = self
            .ingress
            .iter()
            .map(|(port, cidr)| tcp_ingress(*port, cidr.as_str(), "CidrIp"))
            .collect();
        stack.add(
            Resource::new(&self.id, SECURITY_GROUP)
                .property("GroupDescription", self.description.as_str())
                .property("SecurityGroupEgress", egress)
                .property_opt("SecurityGroupIngress", (!ingress.is_empty()).then_some(ingress))
                .property("VpcId", self.vpc.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::synthesize;

    fn network(nat_gateways: usize) -> Network {
        Network {
            id: "TestVPC".into(),
            cidr: "10.0.0.0/16".into(),
            max_azs: 2,
            nat_gateways,
            subnets: vec![SubnetConfiguration {
                name: "Public".into(),
                cidr_mask: 24,
                subnet_type: SubnetType::Public,
            }],
        }
    }

    #[test]
    fn test_cidr_allocate() {
        let cidr: Cidr = "10.0.0.0/16".parse().unwrap();
        let (first, next) = cidr.allocate(24, 0).unwrap();
        assert_eq!(first.to_string(), "10.0.0.0/24");
        assert_eq!(cidr.allocate(24, next).unwrap().0.to_string(), "10.0.1.0/24");
        assert_eq!(cidr.allocate(24, 255 * 256).unwrap().0.to_string(), "10.0.255.0/24");
        assert!(cidr.allocate(24, 256 * 256).is_none());
        assert!(cidr.allocate(8, 0).is_none());

        // A larger block is aligned past the smaller ones before it
        let (aligned, _) = cidr.allocate(20, next).unwrap();
        assert_eq!(aligned.to_string(), "10.0.16.0/20");
    }

    #[test]
    fn test_cidr_rejects_bad_input() {
        assert!("10.0.0.0".parse::<Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("10.0.0.1/16".parse::<Cidr>().is_err());
        assert!("0.0.0.0/0".parse::<Cidr>().is_ok());
    }

    #[test]
    fn test_public_subnets_across_two_zones() {
        let mut stack = Stack::new("Test").unwrap();
        let handle = network(0).declare(&mut stack).unwrap();

        assert_eq!(handle.subnets.len(), 2);
        assert_eq!(handle.public_subnets().len(), 2);
        assert_eq!(handle.subnets[0].cidr.to_string(), "10.0.0.0/24");
        assert_eq!(handle.subnets[1].cidr.to_string(), "10.0.1.0/24");
        assert_eq!(handle.subnets[1].zone_index, 1);
        assert_eq!(handle.public_routes().len(), 2);

        let template = synthesize(&stack).unwrap();
        assert_eq!(template.count_of_type(VPC), 1);
        assert_eq!(template.count_of_type(SUBNET), 2);
        assert_eq!(template.count_of_type(INTERNET_GATEWAY), 1);
        assert_eq!(template.count_of_type(NAT_GATEWAY), 0);
        assert_eq!(
            template.resource("TestVPC").unwrap().properties["CidrBlock"],
            "10.0.0.0/16"
        );
        let route = template.resource("TestVPCPublicSubnet1DefaultRoute").unwrap();
        assert_eq!(route.depends_on, vec!["TestVPCVPCGW"]);
    }

    #[test]
    fn test_nat_gateways_without_private_subnets_rejected() {
        let mut stack = Stack::new("Test").unwrap();
        assert!(network(1).declare(&mut stack).is_err());
    }

    #[test]
    fn test_isolated_subnets_have_no_gateway() {
        let mut stack = Stack::new("Test").unwrap();
        let mut net = network(0);
        net.subnets[0].subnet_type = SubnetType::Isolated;
        let handle = net.declare(&mut stack).unwrap();
        assert!(handle.public_routes().is_empty());
        assert_eq!(stack.of_type(INTERNET_GATEWAY).count(), 0);
        assert_eq!(handle.default_subnet().unwrap().logical_id, "TestVPCPublicSubnet1");
    }

    fn overlaps(a: &Cidr, b: &Cidr) -> bool {
        let start = |c: &Cidr| u64::from(u32::from(c.address));
        start(a) < start(b) + b.size() && start(b) < start(a) + a.size()
    }

    #[test]
    fn test_mixed_mask_groups_do_not_overlap() {
        for masks in [(20, 24), (24, 20)] {
            let mut stack = Stack::new("Test").unwrap();
            let net = Network {
                id: "Vpc".into(),
                cidr: "10.0.0.0/16".into(),
                max_azs: 2,
                nat_gateways: 0,
                subnets: vec![
                    SubnetConfiguration {
                        name: "Big".into(),
                        cidr_mask: masks.0,
                        subnet_type: SubnetType::Public,
                    },
                    SubnetConfiguration {
                        name: "Small".into(),
                        cidr_mask: masks.1,
                        subnet_type: SubnetType::Isolated,
                    },
                ],
            };
            let handle = net.declare(&mut stack).unwrap();
            assert_eq!(handle.subnets.len(), 4);
            for (i, a) in handle.subnets.iter().enumerate() {
                for b in &handle.subnets[i + 1..] {
                    assert!(
                        !overlaps(&a.cidr, &b.cidr),
                        "{} overlaps {}",
                        a.cidr,
                        b.cidr
                    );
                }
            }
        }

        let mut stack = Stack::new("Test").unwrap();
        let handle = Network {
            id: "Vpc".into(),
            cidr: "10.0.0.0/16".into(),
            max_azs: 2,
            nat_gateways: 0,
            subnets: vec![
                SubnetConfiguration {
                    name: "Big".into(),
                    cidr_mask: 20,
                    subnet_type: SubnetType::Public,
                },
                SubnetConfiguration {
                    name: "Small".into(),
                    cidr_mask: 24,
                    subnet_type: SubnetType::Isolated,
                },
            ],
        }
        .declare(&mut stack)
        .unwrap();
        let cidrs: Vec<String> = handle.subnets.iter().map(|s| s.cidr.to_string()).collect();
        assert_eq!(
            cidrs,
            vec!["10.0.0.0/20", "10.0.16.0/20", "10.0.32.0/24", "10.0.33.0/24"]
        );
    }

    #[test]
    fn test_network_too_small_for_subnets() {
        let mut stack = Stack::new("Test").unwrap();
        let mut net = network(0);
        net.cidr = "10.0.0.0/24".into();
        net.subnets[0].cidr_mask = 24;
        let err = net.declare(&mut stack).unwrap_err();
        assert!(err.to_string().contains("no room for subnet #2"));
    }

    #[test]
    fn test_security_group_ingress() {
        let mut stack = Stack::new("Test").unwrap();
        SecurityGroup {
            id: "LbSg".into(),
            description: "lb".into(),
            vpc: Expr::reference("Vpc"),
            ingress: vec![(443, "0.0.0.0/0".into())],
        }
        .declare(&mut stack)
        .unwrap();
        let sg = stack.get("LbSg").unwrap();
        let ingress = sg.get("SecurityGroupIngress").unwrap().to_value();
        assert_eq!(ingress[0]["FromPort"], 443);
        assert_eq!(ingress[0]["CidrIp"], "0.0.0.0/0");
    }
}
