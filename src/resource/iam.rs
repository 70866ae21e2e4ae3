//! IAM roles, policies and policy documents

use declarative::{Construct, Expr, Pseudo, Resource, Result, Stack};

pub const ROLE: &str = "AWS::IAM::Role";
pub const POLICY: &str = "AWS::IAM::Policy";
pub const INSTANCE_PROFILE: &str = "AWS::IAM::InstanceProfile";

const POLICY_VERSION: &str = "2012-10-17";
const ALLOW: &str = "Allow";

/// One `Allow` statement of a policy document
#[derive(Debug, Clone)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<Expr>,
}

impl PolicyStatement {
    pub fn allow<S: Into<String>>(
        actions: impl IntoIterator<Item = S>,
        resources: Vec<Expr>,
    ) -> Self {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resources,
        }
    }

    pub fn to_expr(&self) -> Expr {
        // A single action or resource is rendered as a scalar
        let actions = match self.actions.as_slice() {
            [one] => Expr::from(one),
            many => Expr::list(many.iter().map(String::as_str)),
        };
        let resources = match self.resources.as_slice() {
            [one] => one.clone(),
            many => Expr::List(many.to_vec()),
        };
        Expr::object([
            ("Action", actions),
            ("Effect", Expr::from(ALLOW)),
            ("Resource", resources),
        ])
    }
}

/// A policy document from statements
pub fn policy_document(statements: &[PolicyStatement]) -> Expr {
    Expr::object([
        (
            "Statement",
            Expr::List(statements.iter().map(PolicyStatement::to_expr).collect()),
        ),
        ("Version", Expr::from(POLICY_VERSION)),
    ])
}

/// Trust policy letting an AWS service assume a role
pub fn assume_role_document(service: &str) -> Expr {
    Expr::object([
        (
            "Statement",
            Expr::list([Expr::object([
                ("Action", Expr::from("sts:AssumeRole")),
                ("Effect", Expr::from(ALLOW)),
                ("Principal", Expr::object([("Service", service)])),
            ])]),
        ),
        ("Version", Expr::from(POLICY_VERSION)),
    ])
}

/// ARN of an AWS managed policy, e.g. `AmazonSSMManagedInstanceCore`
pub fn managed_policy_arn(name: &str) -> Expr {
    Expr::join(
        "",
        vec![
            Expr::from("arn:"),
            Expr::Pseudo(Pseudo::Partition),
            Expr::from(format!(":iam::aws:policy/{name}")),
        ],
    )
}

/// An IAM role assumed by an AWS service
#[derive(Debug, Clone)]
pub struct Role {
    pub id: String,
    pub assumed_by: String,
    pub managed_policies: Vec<String>,
}

/// Reference to a declared role
#[derive(Debug, Clone)]
pub struct RoleHandle {
    pub logical_id: String,
}

impl RoleHandle {
    pub fn name(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    pub fn arn(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Arn")
    }
}

impl Construct for Role {
    type Handle = RoleHandle;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("IAM role {} for {}", self.id, self.assumed_by)
    }

    fn declare(&self, stack: &mut Stack) -> Result<RoleHandle> {
        let managed: Vec<Expr> = self
            .managed_policies
            .iter()
            .map(|p| managed_policy_arn(p))
            .collect();
        let resource = Resource::new(&self.id, ROLE)
            .property("AssumeRolePolicyDocument", assume_role_document(&self.assumed_by))
            .property_opt("ManagedPolicyArns", (!managed.is_empty()).then_some(managed));
        let logical_id = stack.add(resource)?;
        Ok(RoleHandle { logical_id })
    }
}

/// An inline policy attached to one or more roles
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: String,
    pub statements: Vec<PolicyStatement>,
    pub roles: Vec<RoleHandle>,
}

impl Construct for Policy {
    type Handle = String;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("IAM policy {} ({} statements)", self.id, self.statements.len())
    }

    fn declare(&self, stack: &mut Stack) -> Result<String> {
        let roles: Vec<Expr> = self.roles.iter().map(RoleHandle::name).collect();
        stack.add(
            Resource::new(&self.id, POLICY)
                .property("PolicyDocument", policy_document(&self.statements))
                .property("PolicyName", self.id.as_str())
                .property("Roles", roles),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_renders_scalars_for_single_items() {
        let stmt = PolicyStatement::allow(["dynamodb:*"], vec![Expr::get_att("Keys", "Arn")]);
        assert_eq!(
            stmt.to_expr().to_value(),
            json!({
                "Action": "dynamodb:*",
                "Effect": "Allow",
                "Resource": { "Fn::GetAtt": ["Keys", "Arn"] }
            })
        );
    }

    #[test]
    fn test_statement_renders_lists_for_many_items() {
        let stmt = PolicyStatement::allow(
            ["logs:CreateLogStream", "logs:PutLogEvents"],
            vec![Expr::from("a"), Expr::from("b")],
        );
        let value = stmt.to_expr().to_value();
        assert_eq!(value["Action"], json!(["logs:CreateLogStream", "logs:PutLogEvents"]));
        assert_eq!(value["Resource"], json!(["a", "b"]));
    }

    #[test]
    fn test_role_declares_trust_and_managed_policies() {
        let mut stack = Stack::new("Test").unwrap();
        let handle = Role {
            id: "InstanceRole".into(),
            assumed_by: "ec2.amazonaws.com".into(),
            managed_policies: vec!["AmazonSSMManagedInstanceCore".into()],
        }
        .declare(&mut stack)
        .unwrap();

        let role = stack.get(&handle.logical_id).unwrap();
        let trust = role.get("AssumeRolePolicyDocument").unwrap().to_value();
        assert_eq!(
            trust["Statement"][0]["Principal"]["Service"],
            "ec2.amazonaws.com"
        );
        let managed = role.get("ManagedPolicyArns").unwrap().to_value();
        assert_eq!(
            managed[0]["Fn::Join"][1][2],
            ":iam::aws:policy/AmazonSSMManagedInstanceCore"
        );
    }

    #[test]
    fn test_policy_references_roles() {
        let mut stack = Stack::new("Test").unwrap();
        let role = RoleHandle {
            logical_id: "TaskRole".into(),
        };
        Policy {
            id: "TaskRolePolicy".into(),
            statements: vec![PolicyStatement::allow(["dynamodb:*"], vec![Expr::from("*")])],
            roles: vec![role],
        }
        .declare(&mut stack)
        .unwrap();
        let policy = stack.get("TaskRolePolicy").unwrap();
        assert_eq!(policy.references(), vec!["TaskRole"]);
    }
}
