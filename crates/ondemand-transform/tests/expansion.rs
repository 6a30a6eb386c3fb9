//! Expansion of whole template fragments through the request boundary.

use ondemand_transform::{ExpansionRequest, ExpansionStatus, Expander};
use serde_json::{Value, json};

fn request(fragment: Value) -> ExpansionRequest {
    serde_json::from_value(json!({
        "region": "us-east-1",
        "accountId": "123456789012",
        "fragment": fragment,
        "transformId": "123456789012::Buildkite-Agent",
        "params": {},
        "requestId": "req-1",
        "templateParameterValues": {},
    }))
    .unwrap()
}

fn terraform() -> Value {
    json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Globals": {},
        "Resources": {
            "Terraform": {
                "Type": "Buildkite::ECS::Agent",
                "Properties": {
                    "Image": "hashicorp/terraform:light",
                    "BuildkiteAgentImage": { "Fn::GetAtt": "BuildAgentSidecar.Outputs.Image" },
                    "SshAgentBackend": {
                        "Fn::FindInMap": ["AgentConfig", { "Ref": "AWS::Region" }, "SshBackend"]
                    },
                    "TaskFamily": "terraform"
                }
            }
        }
    })
}

#[test]
fn test_expands_agent_resource() {
    let response = Expander::default().expand(&request(terraform()));

    assert_eq!(response.request_id, "req-1");
    assert_eq!(response.status, ExpansionStatus::Success);
    let fragment = response.fragment.unwrap();
    assert!(fragment.get("Globals").is_none());
    assert_eq!(fragment["AWSTemplateFormatVersion"], "2010-09-09");

    let resources = fragment["Resources"].as_object().unwrap();
    for name in [
        "TerraformTaskDefinition",
        "TerraformLogGroup",
        "TerraformExecutionRole",
        "TerraformTaskRole",
    ] {
        assert!(resources.contains_key(name), "missing {}", name);
    }
    assert!(!resources.contains_key("Terraform"));
}

#[test]
fn test_task_definition_containers() {
    let fragment = Expander::default()
        .expand(&request(terraform()))
        .fragment
        .unwrap();
    let props = &fragment["Resources"]["TerraformTaskDefinition"]["Properties"];

    assert_eq!(props["Family"], "terraform");
    assert_eq!(
        props["ExecutionRoleArn"],
        json!({ "Fn::GetAtt": ["TerraformExecutionRole", "Arn"] })
    );

    let containers = props["ContainerDefinitions"].as_array().unwrap();
    let names: Vec<_> = containers.iter().map(|c| c["Name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["agent", "agent-init", "ssh-agent"]);

    let agent = &containers[0];
    assert_eq!(agent["Image"], "hashicorp/terraform:light");
    assert_eq!(agent["EntryPoint"], json!(["/buildkite/bin/buildkite-agent"]));
    assert_eq!(agent["VolumesFrom"], json!([{ "SourceContainer": "agent-init" }]));
    assert_eq!(
        agent["DependsOn"],
        json!([
            { "Condition": "SUCCESS", "ContainerName": "agent-init" },
            { "Condition": "HEALTHY", "ContainerName": "ssh-agent" },
        ])
    );
    assert_eq!(
        agent["LogConfiguration"]["Options"]["awslogs-group"],
        "/aws/ecs/terraform"
    );

    let init = &containers[1];
    assert_eq!(init["Image"], json!({ "Fn::GetAtt": "BuildAgentSidecar.Outputs.Image" }));
    assert_eq!(init["Essential"], false);

    let ssh = &containers[2];
    let url = &ssh["Environment"][0]["Value"]["Fn::Sub"];
    assert_eq!(url[0], "https://${ApiId}.execute-api.${Region}.amazonaws.com/${Stage}");
    assert_eq!(url[1]["Stage"]["Fn::Select"][0], 1);
}

#[test]
fn test_roles_are_least_privilege() {
    let fragment = Expander::default()
        .expand(&request(terraform()))
        .fragment
        .unwrap();
    let resources = &fragment["Resources"];

    let execution = &resources["TerraformExecutionRole"]["Properties"];
    assert_eq!(execution["Path"], "/BuildkiteTaskExecutionRole/");
    let statements = &execution["Policies"][0]["PolicyDocument"]["Statement"];
    assert_eq!(statements[0]["Resource"].as_array().unwrap().len(), 1);

    let task = &resources["TerraformTaskRole"]["Properties"];
    assert_eq!(task["Path"], "/BuildkiteAgentTask/");
    assert_eq!(task["Policies"][0]["PolicyName"], "SshAgentApi");

    let log_group = &resources["TerraformLogGroup"];
    assert_eq!(log_group["DependsOn"], "TerraformTaskDefinition");
    assert_eq!(log_group["Properties"]["RetentionInDays"], 1);
}

#[test]
fn test_unsupported_property_fails_whole_expansion() {
    let fragment = json!({
        "Resources": {
            "Good": { "Type": "Buildkite::ECS::Agent", "Properties": { "Image": "alpine" } },
            "Terraform": {
                "Type": "Buildkite::ECS::Agent",
                "Properties": { "Image": "alpine", "Foo": "bar" }
            }
        }
    });
    let response = Expander::default().expand(&request(fragment));

    assert_eq!(response.status, ExpansionStatus::Error);
    assert!(response.fragment.is_none());
    assert_eq!(
        response.message.as_deref(),
        Some("Terraform has unsupported parameters: Foo")
    );
}

#[test]
fn test_other_resources_pass_through() {
    let bucket = json!({ "Type": "AWS::S3::Bucket", "Properties": { "BucketName": "artifacts" } });
    let fragment = json!({ "Resources": { "Artifacts": bucket } });

    let response = Expander::default().expand(&request(fragment));
    assert_eq!(response.fragment.unwrap()["Resources"]["Artifacts"], bucket);
}

#[test]
fn test_globals_override_token_path() {
    let fragment = json!({
        "Globals": {
            "TaskDefinition": { "BuildkiteAgentTokenParameterPath": "/custom/token" }
        },
        "Resources": {
            "Build": {
                "Type": "Buildkite::ECS::Agent",
                "Properties": {
                    "Image": "alpine",
                    "Secrets": [{ "Name": "NPM_TOKEN", "ValueFrom": "/ci/npm" }]
                }
            }
        }
    });
    let fragment = Expander::default().expand(&request(fragment)).fragment.unwrap();
    let agent = &fragment["Resources"]["BuildTaskDefinition"]["Properties"]["ContainerDefinitions"][0];

    assert_eq!(
        agent["Secrets"],
        json!([
            { "Name": "BUILDKITE_AGENT_TOKEN", "ValueFrom": "/custom/token" },
            { "Name": "NPM_TOKEN", "ValueFrom": "/ci/npm" },
        ])
    );

    let execution = &fragment["Resources"]["BuildExecutionRole"]["Properties"];
    let parameters = &execution["Policies"][0]["PolicyDocument"]["Statement"][0]["Resource"];
    assert_eq!(parameters.as_array().unwrap().len(), 2);
}
