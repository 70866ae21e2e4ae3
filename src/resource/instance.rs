//! Compute instances and their elastic IPs

use super::iam::{INSTANCE_PROFILE, RoleHandle};
use super::network::{SecurityGroup, SubnetHandle};
use declarative::{Construct, Error, Expr, Pseudo, Resource, Result, Stack};
use std::collections::BTreeMap;
use std::fmt;

pub const INSTANCE: &str = "AWS::EC2::Instance";
pub const EIP: &str = "AWS::EC2::EIP";
pub const EIP_ASSOCIATION: &str = "AWS::EC2::EIPAssociation";

const AMI_ATTRIBUTE: &str = "ami";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Arm64,
}

/// EC2 instance type such as `t4g.micro`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceType {
    pub family: String,
    pub size: String,
}

impl InstanceType {
    pub fn of(family: &str, size: &str) -> Self {
        Self {
            family: family.to_string(),
            size: size.to_string(),
        }
    }

    /// Graviton families carry a `g` after the generation digit (`t4g`, `c7gn`)
    pub fn architecture(&self) -> Architecture {
        let attributes = self
            .family
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .trim_start_matches(|c: char| c.is_ascii_digit());
        if attributes.contains('g') {
            Architecture::Arm64
        } else {
            Architecture::X86_64
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family, self.size)
    }
}

/// Where an instance's image id comes from
#[derive(Debug, Clone)]
pub enum MachineImage {
    /// Fixed image per region, resolved at deploy time through a mapping
    GenericLinux(BTreeMap<String, String>),
}

impl MachineImage {
    pub fn generic_linux<'a>(amis: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::GenericLinux(
            amis.into_iter()
                .map(|(region, ami)| (region.to_string(), ami.to_string()))
                .collect(),
        )
    }

    /// Register the image table under `mapping` and return the lookup
    fn image_id(&self, stack: &mut Stack, owner: &str, mapping: &str) -> Result<Expr> {
        match self {
            Self::GenericLinux(amis) => {
                if amis.is_empty() {
                    return Err(Error::invalid_property(owner, "no machine image for any region"));
                }
                for (region, ami) in amis {
                    stack.add_mapping(mapping, region, AMI_ATTRIBUTE, ami)?;
                }
                Ok(Expr::find_in_map(
                    mapping,
                    Expr::Pseudo(Pseudo::Region),
                    AMI_ATTRIBUTE,
                ))
            }
        }
    }
}

/// A single EC2 instance with its own profile and security group
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    /// Value of the `Name` tag
    pub name: String,
    pub instance_type: InstanceType,
    pub image: MachineImage,
    /// Mapping holding the image table; instances sharing an image may share it
    pub image_mapping: String,
    pub role: RoleHandle,
    pub vpc: Expr,
    pub subnet: SubnetHandle,
}

#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub logical_id: String,
    pub security_group: String,
}

impl InstanceHandle {
    pub fn instance_id(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }
}

impl Construct for Instance {
    type Handle = InstanceHandle;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Instance {} ({}, {})", self.id, self.name, self.instance_type)
    }

    fn declare(&self, stack: &mut Stack) -> Result<InstanceHandle> {
        let image_id = self.image.image_id(stack, &self.id, &self.image_mapping)?;

        let security_group = SecurityGroup {
            id: format!("{}InstanceSecurityGroup", self.id),
            description: format!("{}/InstanceSecurityGroup", self.id),
            vpc: self.vpc.clone(),
            ingress: Vec::new(),
        }
        .declare(stack)?;

        let profile = stack.add(
            Resource::new(format!("{}InstanceProfile", self.id), INSTANCE_PROFILE)
                .property("Roles", Expr::list([self.role.name()])),
        )?;

        let name_tag = Expr::list([Expr::object([
            ("Key", Expr::from("Name")),
            ("Value", Expr::from(self.name.as_str())),
        ])]);
        let mut resource = Resource::new(&self.id, INSTANCE)
            .property("AvailabilityZone", self.subnet.availability_zone())
            .property("IamInstanceProfile", Expr::reference(&profile))
            .property("ImageId", image_id)
            .property("InstanceType", self.instance_type.to_string())
            .property(
                "SecurityGroupIds",
                Expr::list([SecurityGroup::group_id(&security_group)]),
            )
            .property("SubnetId", self.subnet.id())
            .property("Tags", name_tag)
            .property("UserData", Expr::base64("#!/bin/bash"))
            .depends_on(self.role.logical_id.as_str());
        if let Some(route) = &self.subnet.default_route {
            resource = resource.depends_on(route.as_str());
        }
        let logical_id = stack.add(resource)?;

        log::debug!(
            "declared {} ({}, {:?})",
            logical_id,
            self.instance_type,
            self.instance_type.architecture()
        );
        Ok(InstanceHandle {
            logical_id,
            security_group,
        })
    }
}

/// An elastic IP bound to one instance
#[derive(Debug, Clone)]
pub struct ElasticIp {
    pub id: String,
    pub association_id: String,
    pub instance: InstanceHandle,
}

#[derive(Debug, Clone)]
pub struct ElasticIpHandle {
    pub logical_id: String,
    pub association_id: String,
}

impl Construct for ElasticIp {
    type Handle = ElasticIpHandle;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Elastic IP {} for {}", self.id, self.instance.logical_id)
    }

    fn declare(&self, stack: &mut Stack) -> Result<ElasticIpHandle> {
        let logical_id = stack.add(Resource::new(&self.id, EIP))?;
        let association_id = stack.add(
            Resource::new(&self.association_id, EIP_ASSOCIATION)
                .property("EIP", Expr::reference(&logical_id))
                .property("InstanceId", self.instance.instance_id()),
        )?;
        Ok(ElasticIpHandle {
            logical_id,
            association_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::network::SubnetType;
    use declarative::synthesize;

    fn subnet() -> SubnetHandle {
        SubnetHandle {
            logical_id: "Subnet1".into(),
            cidr: "10.0.0.0/24".parse().unwrap(),
            zone_index: 0,
            subnet_type: SubnetType::Public,
            default_route: None,
        }
    }

    fn instance(id: &str) -> Instance {
        Instance {
            id: id.into(),
            name: "box".into(),
            instance_type: InstanceType::of("t4g", "micro"),
            image: MachineImage::generic_linux([("ap-northeast-1", "ami-0ed400c2ea06a311c")]),
            image_mapping: "Amis".into(),
            role: RoleHandle {
                logical_id: "Role".into(),
            },
            vpc: Expr::reference("Vpc"),
            subnet: subnet(),
        }
    }

    #[test]
    fn test_instance_type_architecture() {
        assert_eq!(InstanceType::of("t4g", "micro").architecture(), Architecture::Arm64);
        assert_eq!(InstanceType::of("c7gn", "large").architecture(), Architecture::Arm64);
        assert_eq!(InstanceType::of("t3", "micro").architecture(), Architecture::X86_64);
        assert_eq!(InstanceType::of("m5d", "xlarge").architecture(), Architecture::X86_64);
        assert_eq!(InstanceType::of("t4g", "micro").to_string(), "t4g.micro");
    }

    #[test]
    fn test_instance_declares_profile_group_and_mapping() {
        let mut stack = Stack::new("Test").unwrap();
        let handle = instance("Box1").declare(&mut stack).unwrap();

        assert!(stack.contains("Box1InstanceProfile"));
        assert!(stack.contains(&handle.security_group));
        assert_eq!(
            stack.mappings()["Amis"]["ap-northeast-1"]["ami"],
            "ami-0ed400c2ea06a311c"
        );

        let resource = stack.get("Box1").unwrap();
        assert_eq!(
            resource.get("InstanceType").and_then(Expr::as_str),
            Some("t4g.micro")
        );
        assert_eq!(resource.explicit_dependencies(), ["Role".to_string()]);
    }

    #[test]
    fn test_instances_share_image_mapping() {
        let mut stack = Stack::new("Test").unwrap();
        instance("Box1").declare(&mut stack).unwrap();
        instance("Box2").declare(&mut stack).unwrap();
        assert_eq!(stack.mappings().len(), 1);
    }

    #[test]
    fn test_empty_image_table_rejected() {
        let mut stack = Stack::new("Test").unwrap();
        let mut box1 = instance("Box1");
        box1.image = MachineImage::GenericLinux(BTreeMap::new());
        assert!(box1.declare(&mut stack).is_err());
    }

    #[test]
    fn test_elastic_ip_association() {
        let mut stack = Stack::new("Test").unwrap();
        stack.add(Resource::new("Role", "AWS::IAM::Role")).unwrap();
        stack.add(Resource::new("Vpc", "AWS::EC2::VPC")).unwrap();
        stack.add(Resource::new("Subnet1", "AWS::EC2::Subnet")).unwrap();
        let handle = instance("Box1").declare(&mut stack).unwrap();
        ElasticIp {
            id: "Eip1".into(),
            association_id: "EipAssoc1".into(),
            instance: handle,
        }
        .declare(&mut stack)
        .unwrap();

        let template = synthesize(&stack).unwrap();
        let eip = template.resource("Eip1").unwrap();
        assert!(eip.properties.is_empty());
        let assoc = template.resource("EipAssoc1").unwrap();
        assert_eq!(assoc.properties["EIP"]["Ref"], "Eip1");
        assert_eq!(assoc.properties["InstanceId"]["Ref"], "Box1");
    }
}
