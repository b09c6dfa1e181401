use kube::CustomResourceExt;

use cfssl_issuer::crd::{ClusterIssuer, Issuer, SigningRequest};

fn main() {
    let crds = [
        serde_yaml::to_string(&Issuer::crd()).unwrap(),
        serde_yaml::to_string(&ClusterIssuer::crd()).unwrap(),
        serde_yaml::to_string(&SigningRequest::crd()).unwrap(),
    ];
    print!("{}", crds.join("---\n"));
}
