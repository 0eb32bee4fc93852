//! VPC, isolated subnets and the collection security group.

use serde_json::{json, Value};

use crate::error::DeclarationError;
use crate::graph::{ResourceGraph, ResourceNode};
use crate::intrinsics::{get_att, join, reference};

pub const VPC_ID: &str = "OpenSearchServerlessVpc";
pub const SECURITY_GROUP_ID: &str = "OpenSearchServerlessSecurityGroup";
pub const VPC_CIDR: &str = "10.0.0.0/16";
pub const SUBNET_CIDR_MASK: u8 = 24;
pub const INGRESS_PORTS: [u16; 2] = [443, 80];

/// A subnet as seen by consumers of the network: its zone and an identifier
/// (a logical id at declaration time, a physical id after apply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRef {
    pub availability_zone: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTopology {
    pub vpc_id: String,
    pub security_group_id: String,
    pub isolated_subnets: Vec<SubnetRef>,
}

fn subnet_logical_id(index: usize) -> String {
    format!("{VPC_ID}IsolatedSubnet{}", index + 1)
}

fn subnet_cidr(index: usize) -> String {
    format!("10.0.{index}.0/{SUBNET_CIDR_MASK}")
}

fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

/// Declares the network: one VPC, one isolated subnet (with its own route
/// table and no internet route) per zone, and one security group admitting
/// HTTPS and HTTP from the VPC's own CIDR.
pub fn declare_network(
    graph: &mut ResourceGraph,
    vpc_name: &str,
    availability_zones: &[String],
) -> Result<NetworkTopology, DeclarationError> {
    graph.add_resource(ResourceNode::new(
        VPC_ID,
        "AWS::EC2::VPC",
        json!({
            "CidrBlock": VPC_CIDR,
            "EnableDnsHostnames": true,
            "EnableDnsSupport": true,
            "InstanceTenancy": "default",
            "Tags": name_tag(vpc_name),
        }),
    ))?;

    let mut isolated_subnets = Vec::with_capacity(availability_zones.len());
    for (index, zone) in availability_zones.iter().enumerate() {
        let subnet_id = subnet_logical_id(index);
        let route_table_id = format!("{subnet_id}RouteTable");
        let subnet_name = format!("{vpc_name}/private-oss-pipeline-Subnet{}", index + 1);

        graph.add_resource(ResourceNode::new(
            &subnet_id,
            "AWS::EC2::Subnet",
            json!({
                "VpcId": reference(VPC_ID),
                "AvailabilityZone": zone,
                "CidrBlock": subnet_cidr(index),
                "MapPublicIpOnLaunch": false,
                "Tags": name_tag(&subnet_name),
            }),
        ))?;
        graph.add_resource(ResourceNode::new(
            &route_table_id,
            "AWS::EC2::RouteTable",
            json!({
                "VpcId": reference(VPC_ID),
                "Tags": name_tag(&subnet_name),
            }),
        ))?;
        graph.add_resource(ResourceNode::new(
            &format!("{route_table_id}Association"),
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({
                "RouteTableId": reference(&route_table_id),
                "SubnetId": reference(&subnet_id),
            }),
        ))?;

        isolated_subnets.push(SubnetRef {
            availability_zone: zone.clone(),
            subnet_id,
        });
    }

    let ingress: Vec<Value> = INGRESS_PORTS
        .iter()
        .map(|port| {
            json!({
                "CidrIp": get_att(VPC_ID, "CidrBlock"),
                "Description": format!("from VPC CIDR:{port}"),
                "FromPort": port,
                "IpProtocol": "tcp",
                "ToPort": port,
            })
        })
        .collect();

    graph.add_resource(ResourceNode::new(
        SECURITY_GROUP_ID,
        "AWS::EC2::SecurityGroup",
        json!({
            "GroupDescription": "OpenSearch Serverless collection and ingestion pipeline access",
            "VpcId": reference(VPC_ID),
            "SecurityGroupIngress": ingress,
            "SecurityGroupEgress": [{
                "CidrIp": "0.0.0.0/0",
                "Description": "Allow all outbound traffic by default",
                "IpProtocol": "-1",
            }],
        }),
    ))?;

    Ok(NetworkTopology {
        vpc_id: VPC_ID.to_string(),
        security_group_id: SECURITY_GROUP_ID.to_string(),
        isolated_subnets,
    })
}

/// Subnets the ingestion pipeline runs in: every subnet in a zone ending in
/// `a`, then every subnet in a zone ending in `b`. Other zones are left out
/// and an id is never listed twice.
pub fn pipeline_subnets(subnets: &[SubnetRef]) -> Vec<SubnetRef> {
    let mut selected: Vec<SubnetRef> = Vec::new();
    for zone_suffix in ['a', 'b'] {
        for subnet in subnets {
            if !subnet.availability_zone.ends_with(zone_suffix) {
                continue;
            }
            if selected
                .iter()
                .any(|existing| existing.subnet_id == subnet.subnet_id)
            {
                continue;
            }
            selected.push(subnet.clone());
        }
    }
    selected
}

/// The `SUBNET_IDS_ISOLATED` value: a JSON array of the pipeline subnets'
/// ids, assembled with `Fn::Join` so the apply engine substitutes the
/// physical ids.
pub fn subnet_ids_json(subnets: &[SubnetRef]) -> Value {
    if subnets.is_empty() {
        return json!("[]");
    }
    let mut parts = vec![json!("[\"")];
    for (index, subnet) in subnets.iter().enumerate() {
        if index > 0 {
            parts.push(json!("\",\""));
        }
        parts.push(reference(&subnet.subnet_id));
    }
    parts.push(json!("\"]"));
    join("", parts)
}
