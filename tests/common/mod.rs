//! Shared helpers for integration tests: a plan builder producing the full
//! seven-node chain the engine expects.

#![allow(dead_code)]

use flowstreams::flowstream::fql::plan::{
    Call, Comparator, FieldConstantCondition, FieldType, FieldUsage, Node, OperatorType, Plan,
    PlanField,
};

pub fn field(name: &str, field_type: FieldType, usage: FieldUsage) -> PlanField {
    PlanField::new(name, field_type, usage)
}

pub fn condition(field_name: &str, comparator: Comparator, constant: &str) -> FieldConstantCondition {
    FieldConstantCondition {
        field_name: field_name.to_string(),
        comparator,
        constant: constant.to_string(),
    }
}

/// An aggregate call spec: function, optional input field name (resolved
/// against the ingress fields), and the output field.
pub struct CallSpec {
    pub function: &'static str,
    pub input: Option<&'static str>,
    pub output: PlanField,
}

pub fn call(function: &'static str, input: Option<&'static str>, output: PlanField) -> CallSpec {
    CallSpec {
        function,
        input,
        output,
    }
}

pub fn tumbling_time_props(amount: &str, unit: &str, time_field: &str) -> Vec<String> {
    ["tumbling", "time", amount, unit, time_field, "false", "N/A"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub fn tumbling_distance_props(rows: &str, sequence_field: &str) -> Vec<String> {
    ["tumbling", "distance", rows, "N/A", "N/A", "false", sequence_field]
        .into_iter()
        .map(String::from)
        .collect()
}

pub fn session_props(include_closing_row: bool) -> Vec<String> {
    let include = if include_closing_row { "true" } else { "false" };
    ["session", "N/A", "N/A", "N/A", "N/A", include, "N/A"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Builds the full ingress → pre-filter → window → aggregate → post-filter
/// → project → egress chain.
pub struct PlanBuilder {
    ingress_fields: Vec<PlanField>,
    pre_conditions: Vec<FieldConstantCondition>,
    window_properties: Vec<String>,
    session_open: Vec<FieldConstantCondition>,
    session_close: Vec<FieldConstantCondition>,
    calls: Vec<CallSpec>,
    post_conditions: Vec<FieldConstantCondition>,
    project_names: Vec<&'static str>,
    project_conditions: Vec<FieldConstantCondition>,
}

impl PlanBuilder {
    pub fn new(ingress_fields: Vec<PlanField>) -> Self {
        Self {
            ingress_fields,
            pre_conditions: Vec::new(),
            window_properties: session_props(false),
            session_open: Vec::new(),
            session_close: Vec::new(),
            calls: Vec::new(),
            post_conditions: Vec::new(),
            project_names: Vec::new(),
            project_conditions: Vec::new(),
        }
    }

    pub fn pre_filter(mut self, conditions: Vec<FieldConstantCondition>) -> Self {
        self.pre_conditions = conditions;
        self
    }

    pub fn window(mut self, properties: Vec<String>) -> Self {
        self.window_properties = properties;
        self
    }

    pub fn session_gates(
        mut self,
        open: Vec<FieldConstantCondition>,
        close: Vec<FieldConstantCondition>,
    ) -> Self {
        self.session_open = open;
        self.session_close = close;
        self
    }

    pub fn aggregate(mut self, calls: Vec<CallSpec>) -> Self {
        self.calls = calls;
        self
    }

    pub fn post_filter(mut self, conditions: Vec<FieldConstantCondition>) -> Self {
        self.post_conditions = conditions;
        self
    }

    pub fn project(mut self, names: Vec<&'static str>) -> Self {
        self.project_names = names;
        self
    }

    pub fn project_filter(mut self, conditions: Vec<FieldConstantCondition>) -> Self {
        self.project_conditions = conditions;
        self
    }

    pub fn build(self) -> Plan {
        let group_fields: Vec<PlanField> = self
            .ingress_fields
            .iter()
            .filter(|f| f.usage == FieldUsage::Group)
            .cloned()
            .collect();

        let aggregate_fields: Vec<PlanField> =
            self.calls.iter().map(|c| c.output.clone()).collect();
        let aggregate_group_fields: Vec<PlanField> = aggregate_fields
            .iter()
            .filter(|f| f.usage == FieldUsage::Group)
            .cloned()
            .collect();

        let project_fields: Vec<PlanField> = if self.project_names.is_empty() {
            aggregate_fields.clone()
        } else {
            self.project_names
                .iter()
                .map(|name| {
                    aggregate_fields
                        .iter()
                        .find(|f| &f.name == name)
                        .unwrap_or_else(|| panic!("projected field '{}' not aggregated", name))
                        .clone()
                })
                .collect()
        };
        let project_group_fields: Vec<PlanField> = project_fields
            .iter()
            .filter(|f| f.usage == FieldUsage::Group)
            .cloned()
            .collect();

        let calls: Vec<Call> = self
            .calls
            .iter()
            .map(|spec| Call {
                function: spec.function.to_string(),
                input_fields: spec
                    .input
                    .map(|name| {
                        vec![self
                            .ingress_fields
                            .iter()
                            .find(|f| f.name == name)
                            .unwrap_or_else(|| panic!("call input '{}' not an ingress field", name))
                            .clone()]
                    })
                    .unwrap_or_default(),
            })
            .collect();

        let mut nodes = Vec::new();

        let mut ingress = Node::new(0, OperatorType::Ingress);
        ingress.fields = self.ingress_fields.clone();
        ingress.group_fields = group_fields.clone();
        ingress.child = Some(1);
        nodes.push(ingress);

        let mut pre = Node::new(1, OperatorType::PreFilter);
        pre.fields = self.ingress_fields.clone();
        pre.group_fields = group_fields.clone();
        pre.conditions = self.pre_conditions;
        pre.child = Some(2);
        nodes.push(pre);

        let mut window = Node::new(2, OperatorType::Window);
        window.fields = self.ingress_fields.clone();
        window.group_fields = group_fields.clone();
        window.properties = self.window_properties;
        window.session_open_conditions = self.session_open;
        window.session_close_conditions = self.session_close;
        window.child = Some(3);
        nodes.push(window);

        let mut aggregate = Node::new(3, OperatorType::Aggregate);
        aggregate.fields = aggregate_fields.clone();
        aggregate.group_fields = aggregate_group_fields.clone();
        aggregate.calls = calls;
        aggregate.child = Some(4);
        nodes.push(aggregate);

        let mut post = Node::new(4, OperatorType::PostFilter);
        post.fields = aggregate_fields;
        post.group_fields = aggregate_group_fields;
        post.conditions = self.post_conditions;
        post.child = Some(5);
        nodes.push(post);

        let mut project = Node::new(5, OperatorType::Project);
        project.fields = project_fields.clone();
        project.group_fields = project_group_fields.clone();
        project.conditions = self.project_conditions;
        project.child = Some(6);
        nodes.push(project);

        let mut egress = Node::new(6, OperatorType::Egress);
        egress.fields = project_fields;
        egress.group_fields = project_group_fields;
        nodes.push(egress);

        Plan::new(nodes)
    }
}
