pub(crate) mod k8s;
