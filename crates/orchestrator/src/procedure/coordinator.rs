//! Procedure Coordinator (§4.4): partitions a plan's normalized changes into
//! an ordered list of procedure objects via a fixed pipeline of
//! match-and-consume filters. The filter table itself is the data the §9
//! redesign note asks for; only the per-service topology constraints vary.

use crate::error::{Result, UpdateError};
use crate::external::ImageStore;
use crate::model::{Instance, NormalizedChange, UpdatePlan};

use super::{
    binder::UpdateBinderV1, download_images::DownloadImages, imgapi::UpdateSingleHeadnodeImgapi, mahi::UpdateMahiV1,
    manatee::UpdateManateeV2, moray::UpdateMorayV2, sapi::UpdateSingleHNSapiV1, stateless::UpdateStatelessServicesV1,
    ufds::UpdateUFDSServiceV1, Procedure, ProcedureList,
};

/// Filter 2's member set (§4.4 table).
const STATELESS_HEADNODE_SERVICES: &[&str] =
    &["adminui", "amon", "amonredis", "assets", "ca", "cloudapi", "cnapi", "dhcpd", "fwapi", "napi", "papi", "rabbitmq", "redis", "sdc", "vmapi", "workflow", "manta"];

struct Filter {
    name: &'static str,
    matches_service: fn(&str) -> bool,
    max_instances: Option<usize>,
    headnode_required: bool,
    make: fn(Vec<NormalizedChange>) -> Procedure,
}

fn instances_of<'a>(curr: &'a [Instance], service_name: &str) -> Vec<&'a Instance> {
    curr.iter().filter(|i| i.service_name == service_name).collect()
}

fn topology_ok(filter: &Filter, change: &NormalizedChange, curr: &[Instance], headnode_server_id: &str) -> bool {
    let instances = instances_of(curr, change.target_service_name());
    if let Some(max) = filter.max_instances {
        if instances.len() > max {
            return false;
        }
    }
    if filter.headnode_required && !instances.iter().all(|i| i.server_id == headnode_server_id) {
        return false;
    }
    true
}

/// `coordinate(plan, inventory) → [Procedure] | UpdateError`. `headnode_server_id`
/// is the one server §3 guarantees is the headnode; it comes from the same
/// inventory snapshot the plan was built against.
pub async fn coordinate(plan: &UpdatePlan, images: &dyn ImageStore, headnode_server_id: &str) -> Result<ProcedureList> {
    let mut procs = Vec::new();

    // Filter 1: image prefetch matches on image presence, not service class,
    // so it runs ahead of (and independent from) the per-service table below.
    let mut to_prefetch = Vec::new();
    for change in &plan.changes {
        if let Some(image) = &change.image {
            if images.get_image(&image.uuid).await.is_err() {
                to_prefetch.push(change.clone());
            }
        }
    }
    if !to_prefetch.is_empty() {
        procs.push(Procedure::DownloadImages(DownloadImages::new(to_prefetch)));
    }

    if plan.just_images {
        return Ok(ProcedureList(procs));
    }

    let filters: Vec<Filter> = vec![
        Filter {
            name: "stateless",
            matches_service: |s| STATELESS_HEADNODE_SERVICES.contains(&s),
            max_instances: Some(1),
            headnode_required: true,
            make: |c| Procedure::UpdateStatelessServicesV1(UpdateStatelessServicesV1::new(c)),
        },
        Filter {
            name: "imgapi",
            matches_service: |s| s == "imgapi",
            max_instances: Some(1),
            headnode_required: true,
            make: |c| Procedure::UpdateSingleHeadnodeImgapi(UpdateSingleHeadnodeImgapi::new(c)),
        },
        Filter {
            name: "ufds",
            matches_service: |s| s == "ufds",
            max_instances: Some(1),
            headnode_required: true,
            make: |c| Procedure::UpdateUFDSServiceV1(UpdateUFDSServiceV1::new(c)),
        },
        Filter {
            name: "moray",
            matches_service: |s| s == "moray",
            max_instances: None,
            headnode_required: false,
            make: |c| Procedure::UpdateMorayV2(UpdateMorayV2::new(c)),
        },
        Filter {
            name: "sapi",
            matches_service: |s| s == "sapi",
            max_instances: Some(1),
            headnode_required: true,
            make: |c| Procedure::UpdateSingleHNSapiV1(UpdateSingleHNSapiV1::new(c)),
        },
        Filter {
            name: "manatee",
            matches_service: |s| s == "manatee",
            max_instances: None,
            headnode_required: false,
            make: |c| Procedure::UpdateManateeV2(UpdateManateeV2::new(c)),
        },
        Filter {
            name: "binder",
            matches_service: |s| s == "binder",
            max_instances: Some(1),
            headnode_required: true,
            make: |c| Procedure::UpdateBinderV1(UpdateBinderV1::new(c)),
        },
        Filter {
            name: "mahi",
            matches_service: |s| s == "mahi",
            max_instances: Some(1),
            headnode_required: true,
            make: |c| Procedure::UpdateMahiV1(UpdateMahiV1::new(c)),
        },
    ];

    let mut remaining = plan.changes.clone();
    for filter in &filters {
        let mut handled = Vec::new();
        let mut rest = Vec::new();
        for change in remaining {
            if (filter.matches_service)(change.target_service_name()) && topology_ok(filter, &change, &plan.curr, headnode_server_id) {
                handled.push(change);
            } else {
                rest.push(change);
            }
        }
        if !handled.is_empty() {
            tracing::info!(filter = filter.name, count = handled.len(), "procedure coordinator matched changes");
            procs.push((filter.make)(handled));
        }
        remaining = rest;
    }

    if !remaining.is_empty() {
        let unhandled: Vec<String> = remaining.iter().map(|c| format!("{}:{}", c.kind, c.target_service_name())).collect();
        return Err(UpdateError::UnsupportedChanges(unhandled.join(", ")).into());
    }

    Ok(ProcedureList(procs))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::external::fakes::FakeImages;
    use crate::model::{Image, Instance, Service, ServiceType, UpdatePlan};

    fn make_change(service_name: &str) -> NormalizedChange {
        NormalizedChange {
            kind: "update-service".to_string(),
            service: Service::new(service_name, ServiceType::Agent),
            instance: None,
            image: Some(Image { uuid: "img-new".to_string(), name: service_name.to_string(), version: "2.0.0".to_string(), published_at: Utc::now(), tags: vec![] }),
            force_same_image: false,
            force_rabbitmq: false,
        }
    }

    #[tokio::test]
    async fn single_cnapi_change_becomes_stateless_procedure() {
        let change = make_change("cnapi");
        let instance = Instance {
            service_name: "cnapi".to_string(),
            kind: ServiceType::Agent,
            instance_id: "headnode-1/cnapi".to_string(),
            image_id: "img-old".to_string(),
            version: "1.0.0".to_string(),
            server_id: "headnode-1".to_string(),
            hostname: "headnode-1".to_string(),
            admin_ip: None,
            alias: None,
        };
        let plan = UpdatePlan::new(vec![instance], vec![], vec![change], false);
        let images = FakeImages::new();
        images.add_image(Image { uuid: "img-new".to_string(), name: "cnapi".to_string(), version: "2.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;

        let procs = coordinate(&plan, &images, "headnode-1").await.unwrap();
        assert_eq!(procs.len(), 1);
        assert!(matches!(procs.iter().next().unwrap(), Procedure::UpdateStatelessServicesV1(_)));
    }

    #[tokio::test]
    async fn unhandled_topology_reports_update_error() {
        // Two sapi instances: sapi's filter requires at most one, so it is
        // never consumed and must surface as an UnsupportedChanges error.
        let change = make_change("sapi");
        let curr = vec![
            Instance { service_name: "sapi".to_string(), kind: ServiceType::Agent, instance_id: "headnode-1/sapi".to_string(), image_id: "img-old".to_string(), version: "1.0.0".to_string(), server_id: "headnode-1".to_string(), hostname: "headnode-1".to_string(), admin_ip: None, alias: None },
            Instance { service_name: "sapi".to_string(), kind: ServiceType::Agent, instance_id: "headnode-2/sapi".to_string(), image_id: "img-old".to_string(), version: "1.0.0".to_string(), server_id: "headnode-2".to_string(), hostname: "headnode-2".to_string(), admin_ip: None, alias: None },
        ];
        let plan = UpdatePlan::new(curr, vec![], vec![change], false);
        let images = FakeImages::new();
        images.add_image(Image { uuid: "img-new".to_string(), name: "sapi".to_string(), version: "2.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;

        let err = coordinate(&plan, &images, "headnode-1").await.unwrap_err();
        assert!(matches!(err, crate::error::OrchestratorError::Update(UpdateError::UnsupportedChanges(_))));
    }

    #[tokio::test]
    async fn just_images_retains_only_download_images() {
        let change = make_change("cnapi");
        let plan = UpdatePlan::new(vec![], vec![], vec![change], true);
        let images = FakeImages::new();

        let procs = coordinate(&plan, &images, "headnode-1").await.unwrap();
        assert_eq!(procs.len(), 1);
        assert!(procs.iter().next().unwrap().is_download_images());
    }
}
