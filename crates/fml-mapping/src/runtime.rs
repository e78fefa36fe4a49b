//! Transform interpreter
//!
//! Executes a map document against input values. Each call owns an
//! [`Evaluation`]: a scope arena (scopes point at their parent by index) and
//! a record arena holding the output records. Target aliases are handles
//! into that arena, so a dependent group writing through an alias mutates
//! the caller's output in place.

use crate::conceptmap::translate;
use crate::transforms::{UNDEFINED, apply_transform, required, text_argument};
use crate::{Error, Result};
use fml_ir::value::infer_type;
use fml_ir::{ElementPath, TypedValue, resolve, types, validate_key, write_value};
use fml_model::{
    ConceptMap, Group, ImportResolver, InputMode, Parameter, Rule, RuleSource, RuleTarget,
    SourceListMode, StructureMap, TransformKind, TypeMode, TypeSchema,
};
use fml_path::{FhirPathEvaluator, PathEvaluator, Variables, to_boolean};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, trace, warn};

const EMPTY: &[TypedValue] = &[];

static DEFAULT_RUNTIME: LazyLock<MappingRuntime> = LazyLock::new(MappingRuntime::new);

/// Run a map document with the default evaluator and no type schema
///
/// # Errors
///
/// Returns the first error raised while evaluating; see [`Error`].
pub fn structure_map_transform(
    map: &StructureMap,
    inputs: Vec<TypedValue>,
    resolver: Option<&dyn ImportResolver>,
) -> Result<Vec<TypedValue>> {
    DEFAULT_RUNTIME.run(map, inputs, resolver)
}

/// Configured interpreter
///
/// A runtime holds no per-call state and can be shared between threads.
pub struct MappingRuntime {
    evaluator: Arc<dyn PathEvaluator + Send + Sync>,
    schema: Option<Arc<dyn TypeSchema + Send + Sync>>,
    resolver: Option<Arc<dyn ImportResolver + Send + Sync>>,
}

impl MappingRuntime {
    /// Runtime with the default path evaluator
    #[must_use]
    pub fn new() -> Self {
        Self {
            evaluator: Arc::new(FhirPathEvaluator::new()),
            schema: None,
            resolver: None,
        }
    }

    /// Use a different path expression evaluator
    #[must_use]
    pub fn with_evaluator<E>(mut self, evaluator: E) -> Self
    where
        E: PathEvaluator + Send + Sync + 'static,
    {
        self.evaluator = Arc::new(evaluator);
        self
    }

    /// Consult a type schema for repeating elements and element types
    #[must_use]
    pub fn with_schema(mut self, schema: Arc<dyn TypeSchema + Send + Sync>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Resolve `imports` declarations through `resolver`
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ImportResolver + Send + Sync>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Execute `map` against `inputs`
    ///
    /// # Errors
    ///
    /// Returns the first error raised while evaluating; see [`Error`].
    pub fn transform(&self, map: &StructureMap, inputs: Vec<TypedValue>) -> Result<Vec<TypedValue>> {
        let resolver = self.resolver.as_deref().map(|r| r as &dyn ImportResolver);
        self.run(map, inputs, resolver)
    }

    fn run(
        &self,
        map: &StructureMap,
        inputs: Vec<TypedValue>,
        resolver: Option<&dyn ImportResolver>,
    ) -> Result<Vec<TypedValue>> {
        let mut evaluation = Evaluation {
            evaluator: self.evaluator.as_ref(),
            schema: self.schema.as_deref().map(|s| s as &dyn TypeSchema),
            resolver,
            map,
            imports: None,
            scopes: Vec::new(),
            records: Vec::new(),
            floating: HashSet::new(),
        };
        evaluation.run(inputs)
    }
}

impl Default for MappingRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Location of a value inside the record arena
#[derive(Debug, Clone, PartialEq)]
struct TargetRef {
    record: usize,
    path: ElementPath,
    type_name: String,
}

#[derive(Debug, Clone)]
enum Binding {
    /// Read-only values (sources, literals, transform results)
    Values(Vec<TypedValue>),
    /// A writable location
    Target(TargetRef),
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<usize>,
    variables: HashMap<String, Binding>,
}

/// A group in the root document or in an imported one
enum GroupLocation {
    Local(usize),
    Imported(Arc<StructureMap>, usize),
}

/// Where a target writes
struct Placement {
    base: TargetRef,
    element: ElementPath,
    path: ElementPath,
    is_array: bool,
    element_type: Option<String>,
    /// Type of a present, non-repeating value at `path`
    existing_type: Option<String>,
}

struct Evaluation<'a> {
    evaluator: &'a dyn PathEvaluator,
    schema: Option<&'a dyn TypeSchema>,
    resolver: Option<&'a dyn ImportResolver>,
    map: &'a StructureMap,
    imports: Option<Vec<Arc<StructureMap>>>,
    scopes: Vec<Scope>,
    records: Vec<TypedValue>,
    /// Records bound to an alias but not yet placed in any output
    floating: HashSet<usize>,
}

impl Evaluation<'_> {
    fn run(&mut self, inputs: Vec<TypedValue>) -> Result<Vec<TypedValue>> {
        let map = self.map;
        if map.group.is_empty() {
            return Err(Error::NoGroups);
        }

        let mut values = inputs;
        for group in entry_groups(map) {
            debug!(group = %group.name, inputs = values.len(), "Evaluating entry group");
            let args = values.into_iter().map(|v| Binding::Values(vec![v])).collect();
            let outputs = self.eval_group(group, args, None)?;
            values = outputs.iter().flat_map(|b| self.materialize(b)).collect();
        }
        Ok(values)
    }

    // Scopes and bindings

    fn push_scope(&mut self, parent: Option<usize>) -> usize {
        self.scopes.push(Scope {
            parent,
            variables: HashMap::new(),
        });
        self.scopes.len() - 1
    }

    fn bind(&mut self, scope: usize, name: &str, binding: Binding) -> Result<()> {
        validate_key(name)?;
        self.scopes[scope].variables.insert(name.to_string(), binding);
        Ok(())
    }

    fn lookup(&self, scope: usize, name: &str) -> Option<&Binding> {
        let mut current = Some(scope);
        while let Some(index) = current {
            let scope = &self.scopes[index];
            if let Some(binding) = scope.variables.get(name) {
                return Some(binding);
            }
            current = scope.parent;
        }
        None
    }

    fn value_of(&self, scope: usize, name: &str) -> Result<Vec<TypedValue>> {
        self.lookup(scope, name)
            .map(|binding| self.materialize(binding))
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))
    }

    /// Every visible variable, inner scopes shadowing outer ones
    fn variables(&self, scope: usize) -> Variables {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(index) = current {
            chain.push(index);
            current = self.scopes[index].parent;
        }

        let mut variables = Variables::new();
        for index in chain.into_iter().rev() {
            for (name, binding) in &self.scopes[index].variables {
                variables.insert(name.clone(), self.materialize(binding));
            }
        }
        variables
    }

    fn materialize(&self, binding: &Binding) -> Vec<TypedValue> {
        match binding {
            Binding::Values(values) => values.clone(),
            Binding::Target(target) => resolve(&self.records[target.record].value, &target.path)
                .map(|value| vec![TypedValue::new(target.type_name.clone(), value.clone())])
                .unwrap_or_default(),
        }
    }

    fn new_record(&mut self, value: TypedValue) -> TargetRef {
        let type_name = value.type_name.clone();
        self.records.push(value);
        TargetRef {
            record: self.records.len() - 1,
            path: ElementPath::root(),
            type_name,
        }
    }

    /// Bind values that have no place in an output record
    fn detach(&mut self, mut values: Vec<TypedValue>) -> Binding {
        if values.len() == 1 && values[0].is_record() {
            if let Some(value) = values.pop() {
                let target = self.new_record(value);
                self.floating.insert(target.record);
                return Binding::Target(target);
            }
        }
        Binding::Values(values)
    }

    /// The writable location a target context names
    ///
    /// A context bound to plain values is promoted to a record of its own.
    fn target_ref(&mut self, scope: usize, name: &str) -> Result<TargetRef> {
        let binding = self
            .lookup(scope, name)
            .cloned()
            .ok_or_else(|| Error::TargetNotFound(name.to_string()))?;

        match binding {
            Binding::Target(target) => Ok(target),
            Binding::Values(values) => {
                let value = values
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| TypedValue::empty_record(types::BACKBONE_ELEMENT));
                let target = self.new_record(value);
                self.bind(scope, name, Binding::Target(target.clone()))?;
                Ok(target)
            }
        }
    }

    // Groups

    fn eval_group(
        &mut self,
        group: &Group,
        args: Vec<Binding>,
        parent: Option<usize>,
    ) -> Result<Vec<Binding>> {
        let sources: Vec<_> = group.inputs(InputMode::Source).collect();
        let targets: Vec<_> = group.inputs(InputMode::Target).collect();

        if sources.is_empty() {
            return Err(Error::MissingSourceDefinitions);
        }
        if targets.is_empty() {
            return Err(Error::MissingTargetDefinitions);
        }
        if args.len() < sources.len() {
            return Err(Error::NotEnoughArguments {
                got: args.len(),
                min: sources.len(),
            });
        }
        if args.len() > sources.len() + targets.len() {
            return Err(Error::TooManyArguments {
                got: args.len(),
                max: sources.len() + targets.len(),
            });
        }

        debug!(group = %group.name, args = args.len(), "Evaluating group");
        let scope = self.push_scope(parent);
        let mut args = args.into_iter();

        for (input, arg) in sources.iter().zip(&mut args) {
            self.bind(scope, &input.name, arg)?;
        }

        let mut outputs = Vec::with_capacity(targets.len());
        for input in &targets {
            let target = match args.next() {
                Some(Binding::Target(target)) => target,
                Some(Binding::Values(values)) => {
                    let value = values.into_iter().next().unwrap_or_else(|| {
                        TypedValue::empty_record(input_type(input.type_name.as_deref()))
                    });
                    self.new_record(value)
                }
                None => self.new_record(TypedValue::empty_record(input_type(
                    input.type_name.as_deref(),
                ))),
            };
            self.bind(scope, &input.name, Binding::Target(target.clone()))?;
            outputs.push(Binding::Target(target));
        }

        for rule in &group.rule {
            self.eval_rule(rule, scope)?;
        }

        Ok(outputs)
    }

    fn load_imports(&mut self) {
        if self.imports.is_some() {
            return;
        }

        let mut documents = Vec::new();
        if let Some(resolver) = self.resolver {
            for url in &self.map.import {
                let found = resolver.resolve_import(url);
                debug!(import = %url, documents = found.len(), "Resolved import");
                documents.extend(found);
            }
        }
        self.imports = Some(documents);
    }

    fn imported(&self) -> &[Arc<StructureMap>] {
        self.imports.as_deref().unwrap_or_default()
    }

    fn find_group(&mut self, predicate: impl Fn(&Group) -> bool) -> Option<GroupLocation> {
        if let Some(index) = self.map.group.iter().position(&predicate) {
            return Some(GroupLocation::Local(index));
        }

        self.load_imports();
        self.imported().iter().find_map(|document| {
            document
                .group
                .iter()
                .position(&predicate)
                .map(|index| GroupLocation::Imported(Arc::clone(document), index))
        })
    }

    fn call_group(
        &mut self,
        location: GroupLocation,
        args: Vec<Binding>,
        parent: usize,
    ) -> Result<Vec<Binding>> {
        let map = self.map;
        match location {
            GroupLocation::Local(index) => self.eval_group(&map.group[index], args, Some(parent)),
            GroupLocation::Imported(document, index) => {
                self.eval_group(&document.group[index], args, Some(parent))
            }
        }
    }

    fn find_concept_map(&mut self, reference: &str) -> Option<&ConceptMap> {
        let map = self.map;
        if let Some(found) = map.concept_map(reference) {
            return Some(found);
        }
        self.load_imports();
        self.imported()
            .iter()
            .find_map(|document| document.concept_map(reference))
    }

    // Rules

    fn eval_rule(&mut self, rule: &Rule, scope: usize) -> Result<()> {
        trace!(rule = rule.name.as_deref().unwrap_or_default(), "Evaluating rule");
        if rule.source.is_empty() {
            return Ok(());
        }
        self.eval_source_at(rule, 0, scope, false)
    }

    /// Depth-first over the cartesian product of the rule's sources
    fn eval_source_at(
        &mut self,
        rule: &Rule,
        index: usize,
        scope: usize,
        fanning: bool,
    ) -> Result<()> {
        let source = &rule.source[index];
        let (candidates, repeating) = self.eval_source(source, scope)?;
        let fanning = fanning || repeating;

        for candidate in candidates {
            self.bind(scope, "_", Binding::Values(vec![candidate.clone()]))?;
            if let Some(variable) = &source.variable {
                self.bind(scope, variable, Binding::Values(vec![candidate]))?;
            }

            if index + 1 < rule.source.len() {
                self.eval_source_at(rule, index + 1, scope, fanning)?;
            } else {
                self.eval_rule_body(rule, scope, fanning)?;
            }
        }
        Ok(())
    }

    /// Matching values of a source and whether the rule fans out over them
    fn eval_source(&self, source: &RuleSource, scope: usize) -> Result<(Vec<TypedValue>, bool)> {
        let context = self.value_of(scope, &source.context)?;

        let (mut values, mut repeating) = match &source.element {
            None => (context.clone(), false),
            Some(element) => {
                let found = self.evaluator.evaluate(element, &context, &Variables::new())?;
                let repeating = context.iter().any(|c| c.is_repeating(element));
                (found, repeating)
            }
        };

        if let Some(type_name) = &source.type_name {
            values.retain(|v| same_type(&v.type_name, type_name));
        }

        if values.is_empty() {
            let Some(default) = &source.default_value_string else {
                trace!(context = %source.context, element = ?source.element, "Source not present");
                return Ok((values, false));
            };
            values.push(TypedValue::string(default.clone()));
            repeating = false;
        }

        if let Some(mode) = source.list_mode {
            values = apply_list_mode(mode, values)?;
            repeating = repeating && !mode.is_singular();
        }

        if source.condition.is_none() && source.check.is_none() && source.log_message.is_none() {
            return Ok((values, repeating));
        }

        let mut variables = self.variables(scope);
        let mut kept = Vec::with_capacity(values.len());
        for value in values {
            if let Some(alias) = &source.variable {
                variables.insert(alias.clone(), vec![value.clone()]);
            }

            if let Some(condition) = &source.condition {
                let result = self.evaluator.evaluate(condition, &context, &variables)?;
                if !to_boolean(&result) {
                    trace!(condition = %condition, "Source condition not met");
                    continue;
                }
            }

            if let Some(check) = &source.check {
                let result = self.evaluator.evaluate(check, &context, &variables)?;
                if !to_boolean(&result) {
                    return Err(Error::CheckFailed(check.clone()));
                }
            }

            if let Some(log) = &source.log_message {
                self.log(log, &context, &variables);
            }

            kept.push(value);
        }

        Ok((kept, repeating))
    }

    fn log(&self, expression: &str, context: &[TypedValue], variables: &Variables) {
        match self.evaluator.evaluate(expression, context, variables) {
            Ok(values) => {
                let message = values
                    .iter()
                    .map(|v| v.to_text().unwrap_or_else(|| v.value.to_string()))
                    .collect::<Vec<_>>()
                    .join(", ");
                info!(expression, "{}", message);
            }
            Err(e) => warn!(expression, error = %e, "Failed to evaluate log expression"),
        }
    }

    fn eval_rule_body(&mut self, rule: &Rule, scope: usize, fanning: bool) -> Result<()> {
        if self.try_shorthand(rule, scope, fanning)? {
            return Ok(());
        }

        for target in &rule.target {
            self.eval_target(target, scope, fanning)?;
        }

        if !rule.rule.is_empty() {
            let child = self.push_scope(Some(scope));
            for nested in &rule.rule {
                self.eval_rule(nested, child)?;
            }
        }

        for dependent in &rule.dependent {
            let location = self
                .find_group(|g| g.name == dependent.name)
                .ok_or_else(|| Error::DependentGroupNotFound(dependent.name.clone()))?;
            let args = dependent
                .variable
                .iter()
                .map(|name| {
                    self.lookup(scope, name)
                        .cloned()
                        .ok_or_else(|| Error::VariableNotFound(name.clone()))
                })
                .collect::<Result<Vec<_>>>()?;
            trace!(group = %dependent.name, args = args.len(), "Invoking dependent group");
            self.call_group(location, args, scope)?;
        }

        Ok(())
    }

    /// `src.a -> tgt.a;` copies the source, or runs a `types` group for it
    fn try_shorthand(&mut self, rule: &Rule, scope: usize, fanning: bool) -> Result<bool> {
        let [target] = rule.target.as_slice() else {
            return Ok(false);
        };
        if target.transform.is_some() || !rule.rule.is_empty() || !rule.dependent.is_empty() {
            return Ok(false);
        }
        let Some(source) = self
            .lookup(scope, "_")
            .and_then(|binding| self.materialize(binding).into_iter().next())
        else {
            return Ok(false);
        };

        let source_type = last_segment(&source.type_name).to_string();
        let types_group = self.find_group(|g| {
            matches!(g.type_mode, TypeMode::Types | TypeMode::TypeAndTypes)
                && g.input.len() == 2
                && g.source_type() == Some(source_type.as_str())
                && g.input[1].mode == InputMode::Target
        });

        let Some(location) = types_group else {
            let copy = RuleTarget {
                transform: Some(TransformKind::Copy),
                parameter: vec![Parameter::Id("_".to_string())],
                ..target.clone()
            };
            self.eval_target(&copy, scope, fanning)?;
            return Ok(true);
        };

        trace!(source_type = %source_type, "Shorthand rule using types group");
        let outputs = self.call_group(location, vec![Binding::Values(vec![source])], scope)?;
        let values: Vec<TypedValue> = outputs.iter().flat_map(|b| self.materialize(b)).collect();

        match self.place(target, scope, fanning)? {
            Some(placement) => self.assign(target, scope, &placement, values),
            None => self.bind_unplaced(target, scope, values),
        }?;
        Ok(true)
    }

    // Targets

    fn eval_target(&mut self, target: &RuleTarget, scope: usize, fanning: bool) -> Result<()> {
        trace!(
            context = ?target.context,
            element = ?target.element,
            transform = ?target.transform,
            "Evaluating target"
        );

        let Some(placement) = self.place(target, scope, fanning)? else {
            return self.eval_unplaced_target(target, scope);
        };

        let values = match &target.transform {
            Some(kind) => self.transform_values(kind, &target.parameter, scope)?,
            None if !placement.is_array && placement.existing_type.is_some() => {
                if let Some(variable) = &target.variable {
                    let type_name = placement
                        .element_type
                        .or(placement.existing_type)
                        .unwrap_or_else(|| types::BACKBONE_ELEMENT.to_string());
                    let existing = TargetRef {
                        record: placement.base.record,
                        path: placement.path,
                        type_name,
                    };
                    self.bind(scope, variable, Binding::Target(existing))?;
                }
                return Ok(());
            }
            None => vec![TypedValue::empty_record(
                placement
                    .element_type
                    .as_deref()
                    .unwrap_or(types::BACKBONE_ELEMENT),
            )],
        };

        self.assign(target, scope, &placement, values)
    }

    /// Targets without an element: `tgt as t`, `create('X') as x`
    fn eval_unplaced_target(&mut self, target: &RuleTarget, scope: usize) -> Result<()> {
        let base = match &target.context {
            Some(context) => Some(self.target_ref(scope, context)?),
            None => None,
        };

        let values = match (&target.transform, base) {
            (Some(kind), _) => self.transform_values(kind, &target.parameter, scope)?,
            (None, Some(base)) => {
                if let Some(variable) = &target.variable {
                    self.bind(scope, variable, Binding::Target(base))?;
                }
                return Ok(());
            }
            (None, None) => Vec::new(),
        };

        self.bind_unplaced(target, scope, values)
    }

    fn bind_unplaced(
        &mut self,
        target: &RuleTarget,
        scope: usize,
        values: Vec<TypedValue>,
    ) -> Result<()> {
        if let Some(variable) = &target.variable {
            if !values.is_empty() {
                let binding = self.detach(values);
                self.bind(scope, variable, binding)?;
            }
        }
        Ok(())
    }

    /// Resolve where a target writes; `None` when it has no element
    fn place(
        &mut self,
        target: &RuleTarget,
        scope: usize,
        fanning: bool,
    ) -> Result<Option<Placement>> {
        let Some(context) = &target.context else {
            return Ok(None);
        };
        let base = self.target_ref(scope, context)?;
        let Some(element) = &target.element else {
            return Ok(None);
        };

        let element_path = ElementPath::parse(element)?;
        let path = base.path.join(&element_path);
        let existing = resolve(&self.records[base.record].value, &path).filter(|v| !v.is_null());
        let existing_array = existing.is_some_and(Value::is_array);
        let existing_type = existing.filter(|v| !v.is_array()).map(infer_type);

        let (schema_array, element_type) = self.element_schema(&base.type_name, element);
        let is_array = schema_array.unwrap_or(existing_array || fanning);

        Ok(Some(Placement {
            base,
            element: element_path,
            path,
            is_array,
            element_type,
            existing_type,
        }))
    }

    /// Repeating flag and single type of a dotted element, per the schema
    fn element_schema(&self, owner: &str, element: &str) -> (Option<bool>, Option<String>) {
        let Some(schema) = self.schema else {
            return (None, None);
        };

        let mut owner = owner.to_string();
        let mut segments = element.split('.').peekable();
        while let Some(segment) = segments.next() {
            let Some(definition) = schema.element(&owner, segment) else {
                return (None, None);
            };
            let single_type = definition.single_type().map(str::to_string);
            if segments.peek().is_none() {
                return (Some(definition.is_array), single_type);
            }
            match single_type {
                Some(next) => owner = next,
                None => return (None, None),
            }
        }
        (None, None)
    }

    /// Write values at a placement and bind the target alias to the result
    fn assign(
        &mut self,
        target: &RuleTarget,
        scope: usize,
        placement: &Placement,
        values: Vec<TypedValue>,
    ) -> Result<()> {
        let Some(first) = values.first() else {
            return Ok(());
        };

        let record = &mut self.records[placement.base.record].value;
        let written = if placement.is_array {
            let mut last = None;
            for value in &values {
                last = Some(write_value(
                    record,
                    &placement.base.path,
                    &placement.element,
                    value.value.clone(),
                    true,
                )?);
            }
            last
        } else {
            Some(write_value(
                record,
                &placement.base.path,
                &placement.element,
                first.value.clone(),
                false,
            )?)
        };

        let placed = match written {
            Some(path) if values.len() == 1 => Some(TargetRef {
                record: placement.base.record,
                path,
                type_name: first.type_name.clone(),
            }),
            _ => None,
        };
        if let Some(placed) = &placed {
            self.follow_copied_record(target, scope, placed);
        }

        let Some(variable) = &target.variable else {
            return Ok(());
        };
        let binding = match placed {
            Some(placed) => Binding::Target(placed),
            None => Binding::Values(values),
        };
        self.bind(scope, variable, binding)
    }

    /// `t.x = b` where `b` names a floating record: `b` now aliases `t.x`
    fn follow_copied_record(&mut self, target: &RuleTarget, scope: usize, placed: &TargetRef) {
        let (Some(TransformKind::Copy), [Parameter::Id(name)]) =
            (&target.transform, target.parameter.as_slice())
        else {
            return;
        };

        let mut current = Some(scope);
        while let Some(index) = current {
            let scope = &mut self.scopes[index];
            if let Some(binding) = scope.variables.get_mut(name) {
                if let Binding::Target(source) = binding {
                    if self.floating.remove(&source.record) {
                        trace!(alias = %name, "Alias follows placed record");
                        *binding = Binding::Target(placed.clone());
                    }
                }
                return;
            }
            current = scope.parent;
        }
    }

    // Transforms

    fn resolve_parameter(&self, parameter: &Parameter, scope: usize) -> Result<Vec<TypedValue>> {
        Ok(match parameter {
            Parameter::Id(name) => self.value_of(scope, name)?,
            Parameter::String(s) => vec![TypedValue::string(s.clone())],
            Parameter::Boolean(b) => vec![TypedValue::boolean(*b)],
            Parameter::Integer(i) => vec![TypedValue::integer(*i)],
            Parameter::Decimal(d) => vec![TypedValue::decimal(*d)],
            Parameter::DateTime(s) => vec![TypedValue::date_time(s.clone())],
        })
    }

    fn transform_values(
        &mut self,
        kind: &TransformKind,
        parameters: &[Parameter],
        scope: usize,
    ) -> Result<Vec<TypedValue>> {
        let args = parameters
            .iter()
            .map(|p| self.resolve_parameter(p, scope))
            .collect::<Result<Vec<_>>>()?;

        match kind {
            TransformKind::Evaluate => self.transform_evaluate(&args, scope),
            TransformKind::Translate => self.transform_translate(kind, &args),
            _ => apply_transform(kind, &args),
        }
    }

    /// `evaluate(expr)` or `evaluate(context, expr)`
    fn transform_evaluate(
        &self,
        args: &[Vec<TypedValue>],
        scope: usize,
    ) -> Result<Vec<TypedValue>> {
        let (context, expression) = match args {
            [] => return Err(Error::MissingTargetParameter(UNDEFINED.to_string())),
            [expression] => (EMPTY, expression),
            [context, expression, ..] => (context.as_slice(), expression),
        };
        let expression = expression
            .first()
            .and_then(TypedValue::as_str)
            .ok_or_else(|| Error::Transform("evaluate expects an expression string".to_string()))?;

        let variables = self.variables(scope);
        Ok(self.evaluator.evaluate(expression, context, &variables)?)
    }

    /// `translate(value, map[, output])`
    fn transform_translate(
        &mut self,
        kind: &TransformKind,
        args: &[Vec<TypedValue>],
    ) -> Result<Vec<TypedValue>> {
        let Some(source) = required(kind, args, 0)?.first() else {
            return Ok(Vec::new());
        };
        let map_uri = text_argument(kind, args, 1)?
            .ok_or_else(|| Error::Transform("translate map must be a string".to_string()))?;
        let output = match args.len() {
            0..=2 => None,
            _ => text_argument(kind, args, 2)?,
        };

        let (system, code) = coded_value(source).ok_or_else(|| {
            Error::Transform(format!("Cannot translate {}", source.value))
        })?;
        let concept_map = self
            .find_concept_map(&map_uri)
            .ok_or_else(|| Error::Transform(format!("Unknown concept map: {map_uri}")))?;

        let Some(found) = translate(concept_map, system.as_deref(), &code) else {
            trace!(code = %code, map = %map_uri, "No translation");
            return Ok(Vec::new());
        };

        let coding = || match &found.system {
            Some(system) => json!({ "system": system, "code": found.code }),
            None => json!({ "code": found.code }),
        };
        let value = match output.as_deref().unwrap_or("code") {
            "code" => TypedValue::new(types::CODE, Value::String(found.code.clone())),
            "system" => match &found.system {
                Some(system) => TypedValue::new("uri", Value::String(system.clone())),
                None => return Ok(Vec::new()),
            },
            "Coding" => TypedValue::new(types::CODING, coding()),
            "CodeableConcept" => {
                TypedValue::new(types::CODEABLE_CONCEPT, json!({ "coding": [coding()] }))
            }
            other => {
                return Err(Error::Transform(format!(
                    "Unsupported translate output: {other}"
                )));
            }
        };
        Ok(vec![value])
    }
}

/// Groups run at the top level, in document order
///
/// A group invoked as a dependent of another group, or one that only exists
/// to convert a type, is not an entry point. When nothing qualifies the
/// first group is the entry.
fn entry_groups(map: &StructureMap) -> Vec<&Group> {
    let mut invoked = HashSet::new();
    for group in &map.group {
        collect_dependents(&group.rule, &group.name, &mut invoked);
    }

    let entries: Vec<&Group> = map
        .group
        .iter()
        .filter(|g| g.type_mode == TypeMode::None && !invoked.contains(g.name.as_str()))
        .collect();

    if entries.is_empty() {
        map.group.iter().take(1).collect()
    } else {
        entries
    }
}

fn collect_dependents<'m>(rules: &'m [Rule], caller: &str, invoked: &mut HashSet<&'m str>) {
    for rule in rules {
        for dependent in &rule.dependent {
            if dependent.name != caller {
                invoked.insert(dependent.name.as_str());
            }
        }
        collect_dependents(&rule.rule, caller, invoked);
    }
}

fn apply_list_mode(mode: SourceListMode, mut values: Vec<TypedValue>) -> Result<Vec<TypedValue>> {
    Ok(match mode {
        SourceListMode::First => values.into_iter().take(1).collect(),
        SourceListMode::NotFirst => values.into_iter().skip(1).collect(),
        SourceListMode::Last => values.pop().into_iter().collect(),
        SourceListMode::NotLast => {
            values.pop();
            values
        }
        SourceListMode::OnlyOne if values.len() > 1 => return Err(Error::ExpectedOnlyOne),
        SourceListMode::OnlyOne => values,
    })
}

fn input_type(declared: Option<&str>) -> &str {
    declared.unwrap_or(types::BACKBONE_ELEMENT)
}

fn last_segment(type_name: &str) -> &str {
    type_name.rsplit('/').next().unwrap_or(type_name)
}

fn same_type(actual: &str, wanted: &str) -> bool {
    last_segment(actual) == last_segment(wanted)
}

/// `(system, code)` of a code string or a Coding-shaped record
fn coded_value(value: &TypedValue) -> Option<(Option<String>, String)> {
    match &value.value {
        Value::String(code) => Some((None, code.clone())),
        Value::Object(map) => {
            let code = map.get("code")?.as_str()?.to_string();
            let system = map.get("system").and_then(Value::as_str).map(str::to_string);
            Some((system, code))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_mapping_language;

    fn run(source: &str, input: Value) -> Result<Value> {
        let map = parse_mapping_language(source)?;
        let mut outputs = structure_map_transform(&map, vec![TypedValue::from_json(input)], None)?;
        Ok(outputs.remove(0).value)
    }

    #[test]
    fn test_list_modes() {
        let values = || {
            vec![
                TypedValue::string("a"),
                TypedValue::string("b"),
                TypedValue::string("c"),
            ]
        };
        let texts = |v: Vec<TypedValue>| v.iter().filter_map(TypedValue::to_text).collect::<Vec<_>>();

        assert_eq!(texts(apply_list_mode(SourceListMode::First, values()).unwrap()), ["a"]);
        assert_eq!(texts(apply_list_mode(SourceListMode::Last, values()).unwrap()), ["c"]);
        assert_eq!(
            texts(apply_list_mode(SourceListMode::NotFirst, values()).unwrap()),
            ["b", "c"]
        );
        assert_eq!(
            texts(apply_list_mode(SourceListMode::NotLast, values()).unwrap()),
            ["a", "b"]
        );
        assert!(matches!(
            apply_list_mode(SourceListMode::OnlyOne, values()),
            Err(Error::ExpectedOnlyOne)
        ));
    }

    #[test]
    fn test_entry_groups_skip_dependents_and_type_groups() {
        let map = parse_mapping_language(
            "group main(source s, target t) { s.a as a -> t.a as ta then helper(a, ta); }
             group helper(source s, target t) { s.b as b -> t.b = b; }
             group Name(source s : Name, target t : Name) <<types>> { s -> t; }
             group recursive(source s, target t) { s.c as c -> t.c as tc then recursive(c, tc); }",
        )
        .unwrap();
        let names: Vec<_> = entry_groups(&map).iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["main", "recursive"]);
    }

    #[test]
    fn test_round_trip_copy() {
        let map = r#"map "u" = t group g(source s, target t) { s.a as a -> t.a = a; }"#;
        assert_eq!(run(map, json!({"a": "x"})).unwrap(), json!({"a": "x"}));
        assert_eq!(
            run(map, json!({"a": {"b": [1, 2]}})).unwrap(),
            json!({"a": {"b": [1, 2]}})
        );
    }

    #[test]
    fn test_absent_source_assigns_nothing() {
        let map = "group g(source s, target t) { s.missing as m -> t.m = m; }";
        assert_eq!(run(map, json!({"a": 1})).unwrap(), json!({}));
    }

    #[test]
    fn test_unbound_source_context() {
        let err = run("group g(source s, target t) { x.a as a -> t.a = a; }", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Variable not found: x");
    }

    #[test]
    fn test_unbound_target_context() {
        let err = run("group g(source s, target t) { s.a as a -> x.a = a; }", json!({"a": 1}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Target not found: x");
    }

    #[test]
    fn test_reserved_target_key() {
        let err = run(
            "group g(source s, target t) { s.a as a -> t.constructor = a; }",
            json!({"a": 1}),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid key: constructor");
    }

    #[test]
    fn test_reserved_alias() {
        let err = run(
            "group g(source s, target t) { s.a as prototype -> t.a = prototype; }",
            json!({"a": 1}),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid key: prototype");
    }

    #[test]
    fn test_unbound_parameter() {
        let err = run("group g(source s, target t) { s.a as a -> t.a = b; }", json!({"a": 1}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Variable not found: b");
    }

    #[test]
    fn test_argument_count() {
        let map = parse_mapping_language("group g(source s, target t) { }").unwrap();
        let err = structure_map_transform(&map, Vec::new(), None).unwrap_err();
        assert_eq!(err.to_string(), "Not enough arguments (got 0, min 1)");

        let three = vec![
            TypedValue::from_json(json!({})),
            TypedValue::from_json(json!({})),
            TypedValue::from_json(json!({})),
        ];
        let err = structure_map_transform(&map, three, None).unwrap_err();
        assert_eq!(err.to_string(), "Too many arguments (got 3, max 2)");
    }

    #[test]
    fn test_missing_source_definitions() {
        let map = parse_mapping_language("group g(target t) { }").unwrap();
        let err = structure_map_transform(&map, Vec::new(), None).unwrap_err();
        assert!(matches!(err, Error::MissingSourceDefinitions));
    }

    #[test]
    fn test_no_groups() {
        let map = parse_mapping_language(r#"map "u" = empty"#).unwrap();
        let err = structure_map_transform(&map, Vec::new(), None).unwrap_err();
        assert_eq!(err.to_string(), "Map document has no groups");
    }

    #[test]
    fn test_supplied_target_is_updated() {
        let map = parse_mapping_language("group g(source s, target t) { s.a as a -> t.a = a; }")
            .unwrap();
        let outputs = structure_map_transform(
            &map,
            vec![
                TypedValue::from_json(json!({"a": 1})),
                TypedValue::from_json(json!({"resourceType": "Basic", "b": 2})),
            ],
            None,
        )
        .unwrap();
        assert_eq!(outputs[0].type_name, "Basic");
        assert_eq!(outputs[0].value, json!({"resourceType": "Basic", "a": 1, "b": 2}));
    }

    #[test]
    fn test_create_alias_is_writable() {
        let map = "group g(source s, target t) {
            s.a as a -> t.thing = create('Basic') as b, b.code = a;
        }";
        assert_eq!(
            run(map, json!({"a": "x"})).unwrap(),
            json!({"thing": {"resourceType": "Basic", "code": "x"}})
        );
    }

    #[test]
    fn test_created_record_placed_before_dependent_fills_it() {
        let map = "group g(source s, target t) {
            s -> create('Basic') as b, t.thing = b then fill(s, b);
        }
        group fill(source s, target b) {
            s.a as a -> b.code = a;
        }";
        assert_eq!(
            run(map, json!({"a": "x"})).unwrap(),
            json!({"thing": {"resourceType": "Basic", "code": "x"}})
        );
    }

    #[test]
    fn test_placed_record_keeps_later_writes() {
        let map = "group g(source s, target t) {
            s.a as a -> create('Basic') as b, t.first = b, b.code = a, t.second = b;
        }";
        assert_eq!(
            run(map, json!({"a": "x"})).unwrap(),
            json!({
                "first": {"resourceType": "Basic", "code": "x"},
                "second": {"resourceType": "Basic", "code": "x"}
            })
        );
    }

    #[test]
    fn test_existing_element_is_reused() {
        let map = "group g(source s, target t) {
            s.a as a -> t.name as n, n.first = a;
            s.b as b -> t.name as n, n.last = b;
        }";
        assert_eq!(
            run(map, json!({"a": "x", "b": "y"})).unwrap(),
            json!({"name": {"first": "x", "last": "y"}})
        );
    }
}
