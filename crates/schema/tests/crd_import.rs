use forma_core::{Value, ViolationKind};
use forma_schema::{crd::import_crd, FieldType, Presence};

const CRD: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: elasticsearchautoscalers.autoscaling.k8s.elastic.co
spec:
  group: autoscaling.k8s.elastic.co
  names:
    kind: ElasticsearchAutoscaler
    plural: elasticsearchautoscalers
  scope: Namespaced
  versions:
    - name: v1alpha1
      served: true
      storage: true
      schema:
        openAPIV3Schema:
          description: ElasticsearchAutoscaler represents an ElasticsearchAutoscaler resource.
          type: object
          properties:
            apiVersion:
              type: string
            kind:
              type: string
            metadata:
              type: object
            spec:
              type: object
              required:
                - elasticsearchRef
              properties:
                elasticsearchRef:
                  type: object
                  properties:
                    name:
                      type: string
                pollingPeriod:
                  type: string
                policies:
                  type: array
                  items:
                    type: object
                    required: [name]
                    properties:
                      name:
                        type: string
                      roles:
                        type: array
                        items:
                          type: string
                      resources:
                        type: object
                        properties:
                          nodeCount:
                            type: object
                            properties:
                              min:
                                type: integer
                                minimum: 0
                              max:
                                type: integer
                      deciders:
                        type: object
                        additionalProperties:
                          type: object
                          additionalProperties:
                            type: string
    - name: v1beta0
      served: false
      storage: false
"#;

#[test]
fn imports_served_versions_only() {
    let versions = import_crd(CRD).unwrap();
    assert_eq!(versions.len(), 1);
    let v = &versions[0];
    assert_eq!(v.identity.api_version, "autoscaling.k8s.elastic.co/v1alpha1");
    assert_eq!(v.identity.kind, "ElasticsearchAutoscaler");
    assert!(v.storage);
    assert_eq!(v.description.as_deref(), Some("ElasticsearchAutoscaler represents an ElasticsearchAutoscaler resource."));
}

#[test]
fn wire_names_are_kept_and_config_names_are_snake_case() {
    let schema = &import_crd(CRD).unwrap()[0].schema;
    let r = schema.lookup("spec.elasticsearch_ref").unwrap();
    assert_eq!(r.wire_name, "elasticsearchRef");
    assert_eq!(r.presence, Presence::Required);
    assert_eq!(schema.lookup("spec.polling_period").unwrap().presence, Presence::Optional);
    let policies = schema.lookup("spec.policies").unwrap();
    match &policies.ty {
        FieldType::List(elem) => match &elem.ty {
            FieldType::Object(fields) => {
                let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, ["deciders", "name", "resources", "roles"]);
            }
            other => panic!("unexpected element type {}", other),
        },
        other => panic!("unexpected type {}", other),
    }
}

#[test]
fn imported_validators_apply() {
    let schema = &import_crd(CRD).unwrap()[0].schema;
    let cfg: Value = serde_yaml::from_str(
        r#"
metadata: {name: es-autoscaler}
spec:
  elasticsearch_ref: {name: es}
  policies:
    - name: di
      resources:
        node_count: {min: -1, max: 3}
"#,
    )
    .unwrap();
    let errs = schema.validate(&cfg);
    assert_eq!(errs.len(), 1, "{:?}", errs);
    assert_eq!(errs[0].path.to_string(), "spec.policies[0].resources.node_count.min");
    assert_eq!(errs[0].kind, ViolationKind::BoundViolation);
}

#[test]
fn non_crd_documents_are_rejected() {
    assert!(import_crd("apiVersion: v1\nkind: ConfigMap\nmetadata: {name: x}\n").is_err());
}

const WIDGET_CRD: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.example.com
spec:
  group: example.com
  scope: Namespaced
  names: {kind: W, plural: widgets, singular: widget}
  versions:
    - name: v1
      served: true
      storage: true
      schema:
        openAPIV3Schema:
          type: object
          required: [spec]
          properties:
            spec:
              type: object
              required: [size]
              properties:
                size: {type: integer}
"#;

#[test]
fn root_required_spec_is_enforced() {
    let schema = &import_crd(WIDGET_CRD).unwrap()[0].schema;
    assert_eq!(schema.field("spec").unwrap().presence, Presence::Required);
    let cfg: Value = serde_yaml::from_str("metadata: {name: x}\n").unwrap();
    let errs = schema.validate(&cfg);
    assert_eq!(errs.len(), 1, "{:?}", errs);
    assert_eq!(errs[0].path.to_string(), "spec.size");
    assert_eq!(errs[0].kind, ViolationKind::MissingRequired);

    let plain = &import_crd(CRD).unwrap()[0].schema;
    assert_eq!(plain.field("spec").unwrap().presence, Presence::Optional);
}
