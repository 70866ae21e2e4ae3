//! Table - provisioned DynamoDB tables with capacity autoscaling

use declarative::{
    Construct, Error, Expr, Pseudo, RemovalPolicy, Resource, Result, Stack, sanitize_id,
};
use std::collections::BTreeMap;

pub const TABLE: &str = "AWS::DynamoDB::Table";
pub const SCALABLE_TARGET: &str = "AWS::ApplicationAutoScaling::ScalableTarget";
pub const SCALING_POLICY: &str = "AWS::ApplicationAutoScaling::ScalingPolicy";

const AUTOSCALING_ROLE: &str = concat!(
    ":role/aws-service-role/dynamodb.application-autoscaling.amazonaws.com/",
    "AWSServiceRoleForApplicationAutoScaling_DynamoDBTable"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
}

impl AttributeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "S",
            Self::Number => "N",
        }
    }
}

/// A key attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

impl Attribute {
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attribute_type: AttributeType::String,
        }
    }

    pub fn number(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attribute_type: AttributeType::Number,
        }
    }
}

/// Target tracking on consumed capacity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub min_capacity: u32,
    pub max_capacity: u32,
    /// Percent of provisioned capacity to hold consumption at
    pub target_utilization: f64,
}

impl Scaling {
    fn validate(&self, owner: &str) -> Result<()> {
        if self.min_capacity == 0 {
            return Err(Error::invalid_property(owner, "min capacity must be at least 1"));
        }
        if self.max_capacity < self.min_capacity {
            return Err(Error::invalid_property(
                owner,
                format!(
                    "max capacity {} is below min capacity {}",
                    self.max_capacity, self.min_capacity
                ),
            ));
        }
        if !(10.0..=90.0).contains(&self.target_utilization) {
            return Err(Error::invalid_property(
                owner,
                format!(
                    "target utilization {} must be between 10 and 90",
                    self.target_utilization
                ),
            ));
        }
        Ok(())
    }
}

/// A global secondary index with its own provisioned capacity
#[derive(Debug, Clone)]
pub struct GlobalSecondaryIndex {
    pub name: String,
    pub partition_key: Attribute,
    pub read_capacity: u32,
    pub write_capacity: u32,
}

/// A provisioned-capacity table
#[derive(Debug, Clone)]
pub struct Table {
    pub id: String,
    pub table_name: String,
    pub partition_key: Attribute,
    pub sort_key: Option<Attribute>,
    pub time_to_live_attribute: Option<String>,
    pub point_in_time_recovery: bool,
    pub read_capacity: u32,
    pub write_capacity: u32,
    pub removal_policy: RemovalPolicy,
    pub indexes: Vec<GlobalSecondaryIndex>,
    /// Applied to reads and writes of the table and of every index
    pub scaling: Option<Scaling>,
}

#[derive(Debug, Clone)]
pub struct TableHandle {
    pub logical_id: String,
    pub index_names: Vec<String>,
}

impl TableHandle {
    /// `Ref` of a table resolves to its name
    pub fn name(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    pub fn arn(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Arn")
    }
}

fn throughput(read: u32, write: u32) -> Expr {
    Expr::object([
        ("ReadCapacityUnits", read),
        ("WriteCapacityUnits", write),
    ])
}

fn key_schema(partition: &Attribute, sort: Option<&Attribute>) -> Expr {
    let mut keys = vec![Expr::object([
        ("AttributeName", partition.name.as_str()),
        ("KeyType", "HASH"),
    ])];
    if let Some(sort) = sort {
        keys.push(Expr::object([
            ("AttributeName", sort.name.as_str()),
            ("KeyType", "RANGE"),
        ]));
    }
    Expr::List(keys)
}

#[derive(Debug, Clone, Copy)]
enum Capacity {
    Read,
    Write,
}

impl Capacity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
        }
    }
}

impl Table {
    fn attribute_definitions(&self) -> Result<Expr> {
        let keys = std::iter::once(&self.partition_key)
            .chain(self.sort_key.as_ref())
            .chain(self.indexes.iter().map(|i| &i.partition_key));
        let mut definitions: BTreeMap<&str, AttributeType> = BTreeMap::new();
        for key in keys {
            match definitions.get(key.name.as_str()) {
                Some(existing) if *existing != key.attribute_type => {
                    return Err(Error::invalid_property(
                        &self.id,
                        format!("attribute {} declared with two types", key.name),
                    ));
                }
                Some(_) => {}
                None => {
                    definitions.insert(&key.name, key.attribute_type);
                }
            }
        }
        Ok(Expr::list(definitions.into_iter().map(|(name, ty)| {
            Expr::object([("AttributeName", name), ("AttributeType", ty.as_str())])
        })))
    }

    fn index_expr(index: &GlobalSecondaryIndex) -> Expr {
        Expr::object([
            ("IndexName", Expr::from(index.name.as_str())),
            ("KeySchema", key_schema(&index.partition_key, None)),
            ("Projection", Expr::object([("ProjectionType", "ALL")])),
            (
                "ProvisionedThroughput",
                throughput(index.read_capacity, index.write_capacity),
            ),
        ])
    }

    fn validate(&self) -> Result<()> {
        let mut seen: Vec<&str> = Vec::new();
        for index in &self.indexes {
            if seen.contains(&index.name.as_str()) {
                return Err(Error::invalid_property(
                    &self.id,
                    format!("duplicate index {}", index.name),
                ));
            }
            seen.push(index.name.as_str());
        }
        if let Some(scaling) = &self.scaling {
            scaling.validate(&self.id)?;
        }
        Ok(())
    }

    /// Scalable target plus target tracking policy for one dimension
    fn declare_scaling(
        &self,
        stack: &mut Stack,
        scaling: &Scaling,
        table: &str,
        index: Option<&str>,
        capacity: Capacity,
    ) -> Result<()> {
        let (prefix, resource_id, dimension) = match index {
            Some(index) => (
                format!("{}{}{}Scaling", self.id, sanitize_id(index), capacity.as_str()),
                Expr::join(
                    "",
                    vec![
                        Expr::from("table/"),
                        Expr::reference(table),
                        Expr::from(format!("/index/{index}")),
                    ],
                ),
                format!("dynamodb:index:{}CapacityUnits", capacity.as_str()),
            ),
            None => (
                format!("{}{}Scaling", self.id, capacity.as_str()),
                Expr::join("", vec![Expr::from("table/"), Expr::reference(table)]),
                format!("dynamodb:table:{}CapacityUnits", capacity.as_str()),
            ),
        };

        let role_arn = Expr::join(
            "",
            vec![
                Expr::from("arn:"),
                Expr::Pseudo(Pseudo::Partition),
                Expr::from(":iam::"),
                Expr::Pseudo(Pseudo::AccountId),
                Expr::from(AUTOSCALING_ROLE),
            ],
        );
        let target = stack.add(
            Resource::new(format!("{prefix}Target"), SCALABLE_TARGET)
                .property("MaxCapacity", scaling.max_capacity)
                .property("MinCapacity", scaling.min_capacity)
                .property("ResourceId", resource_id)
                .property("RoleARN", role_arn)
                .property("ScalableDimension", dimension)
                .property("ServiceNamespace", "dynamodb"),
        )?;

        let metric = format!("DynamoDB{}CapacityUtilization", capacity.as_str());
        let policy_id = format!("{prefix}TargetTracking");
        stack.add(
            Resource::new(&policy_id, SCALING_POLICY)
                .property("PolicyName", policy_id.as_str())
                .property("PolicyType", "TargetTrackingScaling")
                .property("ScalingTargetId", Expr::reference(&target))
                .property(
                    "TargetTrackingScalingPolicyConfiguration",
                    Expr::object([
                        (
                            "PredefinedMetricSpecification",
                            Expr::object([("PredefinedMetricType", metric)]),
                        ),
                        ("TargetValue", Expr::from(scaling.target_utilization)),
                    ]),
                ),
        )?;
        Ok(())
    }
}

impl Construct for Table {
    type Handle = TableHandle;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Table {} ({} indexes)", self.table_name, self.indexes.len())
    }

    fn declare(&self, stack: &mut Stack) -> Result<TableHandle> {
        self.validate()?;

        let indexes: Vec<Expr> = self.indexes.iter().map(Self::index_expr).collect();
        let resource = Resource::new(&self.id, TABLE)
            .property("AttributeDefinitions", self.attribute_definitions()?)
            .property_opt("GlobalSecondaryIndexes", (!indexes.is_empty()).then_some(indexes))
            .property("KeySchema", key_schema(&self.partition_key, self.sort_key.as_ref()))
            .property_opt(
                "PointInTimeRecoverySpecification",
                self.point_in_time_recovery
                    .then(|| Expr::object([("PointInTimeRecoveryEnabled", true)])),
            )
            .property(
                "ProvisionedThroughput",
                throughput(self.read_capacity, self.write_capacity),
            )
            .property("TableName", self.table_name.as_str())
            .property_opt(
                "TimeToLiveSpecification",
                self.time_to_live_attribute.as_deref().map(|attr| {
                    Expr::object([
                        ("AttributeName", Expr::from(attr)),
                        ("Enabled", Expr::from(true)),
                    ])
                }),
            )
            .removal_policy(self.removal_policy);
        let logical_id = stack.add(resource)?;

        if let Some(scaling) = &self.scaling {
            for capacity in [Capacity::Read, Capacity::Write] {
                self.declare_scaling(stack, scaling, &logical_id, None, capacity)?;
            }
            for index in &self.indexes {
                for capacity in [Capacity::Read, Capacity::Write] {
                    let index = Some(index.name.as_str());
                    self.declare_scaling(stack, scaling, &logical_id, index, capacity)?;
                }
            }
        }

        log::debug!("declared table {} ({})", logical_id, self.table_name);
        Ok(TableHandle {
            logical_id,
            index_names: self.indexes.iter().map(|i| i.name.clone()).collect(),
        })
    }
}
