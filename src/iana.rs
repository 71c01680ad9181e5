//! IANA registry lookups used by the enrichment stage. Unknown numbers fall
//! back to their decimal rendering so downstream keys stay printable.

/// Well-known service name for a transport port.
pub fn service_name(port: u16) -> String {
    let name = match port {
        7 => "echo",
        20 => "ftp-data",
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        37 => "time",
        43 => "whois",
        53 => "domain",
        67 => "bootps",
        68 => "bootpc",
        69 => "tftp",
        80 => "http",
        88 => "kerberos",
        110 => "pop3",
        111 => "sunrpc",
        119 => "nntp",
        123 => "ntp",
        135 => "epmap",
        137 => "netbios-ns",
        138 => "netbios-dgm",
        139 => "netbios-ssn",
        143 => "imap",
        161 => "snmp",
        162 => "snmptrap",
        179 => "bgp",
        194 => "irc",
        389 => "ldap",
        427 => "svrloc",
        443 => "https",
        445 => "microsoft-ds",
        464 => "kpasswd",
        465 => "submissions",
        500 => "isakmp",
        514 => "syslog",
        515 => "printer",
        520 => "router",
        546 => "dhcpv6-client",
        547 => "dhcpv6-server",
        554 => "rtsp",
        587 => "submission",
        631 => "ipp",
        636 => "ldaps",
        873 => "rsync",
        902 => "vmware-auth",
        993 => "imaps",
        995 => "pop3s",
        1080 => "socks",
        1194 => "openvpn",
        1433 => "ms-sql-s",
        1521 => "oracle-tns",
        1701 => "l2tp",
        1723 => "pptp",
        1812 => "radius",
        1813 => "radius-acct",
        1883 => "mqtt",
        2049 => "nfs",
        2181 => "zookeeper",
        2375 => "docker",
        3128 => "squid-http",
        3268 => "globalcat-ldap",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        4739 => "ipfix",
        5060 => "sip",
        5222 => "xmpp-client",
        5432 => "postgresql",
        5671 => "amqps",
        5672 => "amqp",
        5900 => "vnc",
        6379 => "redis",
        8080 => "http-alt",
        8443 => "https-alt",
        9092 => "kafka",
        9200 => "wap-wsp",
        11211 => "memcache",
        27017 => "mongodb",
        _ => return port.to_string(),
    };
    name.to_string()
}

/// Transport protocol name for an IP protocol number.
pub fn transport_name(protocol: u8) -> String {
    let name = match protocol {
        0 => "hopopt",
        1 => "icmp",
        2 => "igmp",
        4 => "ipv4",
        6 => "tcp",
        8 => "egp",
        9 => "igp",
        17 => "udp",
        41 => "ipv6",
        46 => "rsvp",
        47 => "gre",
        50 => "esp",
        51 => "ah",
        58 => "ipv6-icmp",
        88 => "eigrp",
        89 => "ospfigp",
        94 => "ipip",
        103 => "pim",
        112 => "vrrp",
        115 => "l2tp",
        132 => "sctp",
        136 => "udplite",
        _ => return protocol.to_string(),
    };
    name.to_string()
}
