use std::path::Path;

use crate::id::Identifier;
use crate::port::{PortPairs, PORT_MAPPING_PREFIX};

/// Unit-file line carrying the owning container.
pub const CONTAINER_ID_PREFIX: &str = "X-ContainerId=";

/// Render the unit definition for a container. The `X-` trailer lines are
/// the durable record of ownership and port mappings and are read back by
/// the delete and reuse paths.
pub fn render_unit(
    id: &Identifier,
    image: &str,
    ports: &PortPairs,
    environment: Option<&Path>,
) -> String {
    let mut publish = String::new();
    for pair in ports {
        publish.push_str(&format!(" -p {}:{}", pair.external, pair.internal));
    }
    let env_line = match environment {
        Some(path) => format!("EnvironmentFile=-{}\n", path.display()),
        None => String::new(),
    };
    let mut unit = format!(
        "[Unit]\n\
         Description=Container {id}\n\
         \n\
         [Service]\n\
         Type=simple\n\
         {env_line}\
         ExecStart=/usr/bin/docker run --rm --name {id}{publish} {image}\n\
         ExecStop=/usr/bin/docker stop {id}\n\
         Restart=on-failure\n\
         \n\
         [Install]\n\
         WantedBy=container.target\n\
         \n\
         {CONTAINER_ID_PREFIX}{id}\n"
    );
    if !ports.is_empty() {
        unit.push_str(&format!("{}{}\n", PORT_MAPPING_PREFIX, ports.to_header()));
    }
    unit
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::port::{ports_from_unit_file, Port, PortPair};

    #[test]
    fn rendered_ports_read_back_in_order() {
        let id = Identifier::new("mydb").unwrap();
        let ports: PortPairs = [
            PortPair::new(Port::new(8080).unwrap(), Port::new(41000).unwrap()),
            PortPair::new(Port::new(8443).unwrap(), Port::new(41001).unwrap()),
        ]
        .into_iter()
        .collect();

        let unit = render_unit(&id, "registry.example/db:9", &ports, None);
        let parsed = ports_from_unit_file(unit.as_bytes()).unwrap();

        assert_eq!(parsed, ports);
        assert!(unit.contains("X-ContainerId=mydb"));
        assert!(unit.contains("-p 41000:8080 -p 41001:8443"));
    }

    #[test]
    fn environment_file_is_optional() {
        let id = Identifier::new("mydb").unwrap();

        let bare = render_unit(&id, "img", &PortPairs::new(), None);
        assert!(!bare.contains("EnvironmentFile"));
        assert!(!bare.contains(PORT_MAPPING_PREFIX));

        let with_env = render_unit(
            &id,
            "img",
            &PortPairs::new(),
            Some(Path::new("/defs/mydb/environment")),
        );
        assert!(with_env.contains("EnvironmentFile=-/defs/mydb/environment"));
    }
}
